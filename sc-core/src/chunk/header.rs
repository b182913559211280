//! Per-chunk header structures: the secure-message header every chunk starts with, the two
//! forms of security header, and the sequence header.

use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;

use crate::wire::{Final, MessageType, SECURE_MESSAGE_HEADER_SIZE, SEQUENCE_HEADER_SIZE};

#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
	pub msg_type: MessageType,
	pub is_final: Final,
	pub message_size: u32,
	pub secure_channel_id: u32,
}

impl MessageHeader {
	/// Parse the fixed 12-byte secure-message header. `buf` must hold at least
	/// [`SECURE_MESSAGE_HEADER_SIZE`] bytes.
	pub fn read(buf: &[u8]) -> Result<Self> {
		if buf.len() < SECURE_MESSAGE_HEADER_SIZE {
			return Err(fail!(StatusCode::BadTcpInternalError, "Header read attempted on a buffer shorter than {SECURE_MESSAGE_HEADER_SIZE} bytes"));
		}

		let msg_type = MessageType::from_token([buf[0], buf[1], buf[2]])
			.ok_or_else(|| fail!(StatusCode::BadTcpMessageTypeInvalid, "Unrecognized message type token {:?}", &buf[0..3]))?;

		let is_final = Final::from_byte(buf[3]).ok_or_else(|| fail!(StatusCode::BadTcpMessageTypeInvalid, "Unrecognized isFinal byte {:#x}", buf[3]))?;

		let message_size = u32::from_le_bytes(buf[4..8].try_into().expect("checked length"));
		let secure_channel_id = u32::from_le_bytes(buf[8..12].try_into().expect("checked length"));

		Ok(Self { msg_type, is_final, message_size, secure_channel_id })
	}

	pub fn write(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&self.msg_type.token());
		out.push(self.is_final.byte());
		out.extend_from_slice(&self.message_size.to_le_bytes());
		out.extend_from_slice(&self.secure_channel_id.to_le_bytes());
	}

	/// Patch the `messageSize` field of a chunk already written into `out`, once its final
	/// length is known.
	pub fn patch_message_size(out: &mut [u8], message_size: u32) {
		out[4..8].copy_from_slice(&message_size.to_le_bytes());
	}
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
	let slice = buf.get(at..at + 4).ok_or_else(|| fail!(StatusCode::BadTcpInternalError, "Buffer too short to read u32 at offset {at}"))?;
	Ok(u32::from_le_bytes(slice.try_into().expect("length checked above")))
}

fn read_variable(buf: &[u8], at: &mut usize) -> Result<Vec<u8>> {
	let len = read_u32(buf, *at)?;
	*at += 4;

	if len == u32::MAX {
		return Ok(Vec::new());
	}

	let len = len as usize;
	let bytes = buf.get(*at..*at + len).ok_or_else(|| fail!(StatusCode::BadTcpInternalError, "Security header field shorter than declared length"))?;
	*at += len;
	Ok(bytes.to_vec())
}

fn write_variable(out: &mut Vec<u8>, value: &[u8]) {
	if value.is_empty() {
		out.extend_from_slice(&u32::MAX.to_le_bytes());
	} else {
		out.extend_from_slice(&(value.len() as u32).to_le_bytes());
		out.extend_from_slice(value);
	}
}

/// The asymmetric security header preceding an OPN chunk: policy URI, sender certificate,
/// and the thumbprint of the certificate the sender believes belongs to the receiver.
#[derive(Debug, Clone)]
pub struct AsymmetricSecurityHeader {
	pub policy_uri: String,
	pub sender_certificate: Vec<u8>,
	pub receiver_thumbprint: Vec<u8>,
}

impl AsymmetricSecurityHeader {
	pub fn read(buf: &[u8]) -> Result<(Self, usize)> {
		let mut at = 0;
		let policy_uri_bytes = read_variable(buf, &mut at)?;
		let policy_uri = String::from_utf8(policy_uri_bytes).map_err(|_| fail!(StatusCode::BadTcpInternalError, "Policy URI is not valid UTF-8"))?;
		let sender_certificate = read_variable(buf, &mut at)?;
		let receiver_thumbprint = read_variable(buf, &mut at)?;

		Ok((Self { policy_uri, sender_certificate, receiver_thumbprint }, at))
	}

	pub fn write(&self, out: &mut Vec<u8>) {
		write_variable(out, self.policy_uri.as_bytes());
		write_variable(out, &self.sender_certificate);
		write_variable(out, &self.receiver_thumbprint);
	}

	pub fn encoded_size(&self) -> usize {
		12 + self.policy_uri.len() + self.sender_certificate.len() + self.receiver_thumbprint.len()
	}
}

/// The symmetric security header preceding an MSG or CLO chunk: just the active token id.
#[derive(Debug, Clone, Copy)]
pub struct SymmetricSecurityHeader {
	pub token_id: u32,
}

impl SymmetricSecurityHeader {
	pub fn read(buf: &[u8]) -> Result<Self> {
		Ok(Self { token_id: read_u32(buf, 0)? })
	}

	pub fn write(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&self.token_id.to_le_bytes());
	}
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceHeader {
	pub sequence_number: u32,
	pub request_id: u32,
}

impl SequenceHeader {
	pub fn read(buf: &[u8]) -> Result<Self> {
		if buf.len() < SEQUENCE_HEADER_SIZE {
			return Err(fail!(StatusCode::BadTcpInternalError, "Buffer too short for sequence header"));
		}

		Ok(Self { sequence_number: read_u32(buf, 0)?, request_id: read_u32(buf, 4)? })
	}

	pub fn write(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&self.sequence_number.to_le_bytes());
		out.extend_from_slice(&self.request_id.to_le_bytes());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn message_header_round_trips() {
		let header = MessageHeader { msg_type: MessageType::Msg, is_final: Final::Final, message_size: 128, secure_channel_id: 7 };

		let mut out = Vec::new();
		header.write(&mut out);

		let parsed = MessageHeader::read(&out).unwrap();
		assert_eq!(parsed.msg_type, MessageType::Msg);
		assert_eq!(parsed.is_final, Final::Final);
		assert_eq!(parsed.message_size, 128);
		assert_eq!(parsed.secure_channel_id, 7);
	}

	#[test]
	fn message_header_rejects_unknown_token() {
		let mut buf = vec![b'X', b'X', b'X', b'F', 0, 0, 0, 0, 0, 0, 0, 0];
		buf.resize(12, 0);
		assert!(MessageHeader::read(&buf).is_err());
	}

	#[test]
	fn asymmetric_security_header_round_trips() {
		let header = AsymmetricSecurityHeader {
			policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256".into(),
			sender_certificate: vec![1, 2, 3],
			receiver_thumbprint: vec![4, 5, 6, 7],
		};

		let mut out = Vec::new();
		header.write(&mut out);
		assert_eq!(out.len(), header.encoded_size());

		let (parsed, consumed) = AsymmetricSecurityHeader::read(&out).unwrap();
		assert_eq!(consumed, out.len());
		assert_eq!(parsed.policy_uri, header.policy_uri);
		assert_eq!(parsed.sender_certificate, header.sender_certificate);
	}

	#[test]
	fn sequence_header_round_trips() {
		let header = SequenceHeader { sequence_number: 52, request_id: 9 };
		let mut out = Vec::new();
		header.write(&mut out);

		let parsed = SequenceHeader::read(&out).unwrap();
		assert_eq!(parsed.sequence_number, 52);
		assert_eq!(parsed.request_id, 9);
	}
}
