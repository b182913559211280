//! Flat (unsecured) TCP message bodies — HEL/ACK/ERR — and the OpenSecureChannel /
//! CloseSecureChannel request/response bodies carried inside OPN/CLO chunks.
//!
//! The full OPC UA binary encoding of a generic service body (`NodeId` + `ExtensionObject`
//! envelope around an arbitrary structure) belongs to the services layer this crate
//! deliberately does not implement. OPN/CLO are the one exception: they are themselves
//! secure-channel messages, so this module encodes/decodes exactly the fields the channel
//! layer inspects, using a compact internal layout rather than the full generic envelope.

use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;

use crate::wire::{RequestType, SecurityMode};

fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
	let slice = buf.get(at..at + 4).ok_or_else(|| fail!(StatusCode::BadTcpInternalError, "Buffer too short to read u32 at offset {at}"))?;
	Ok(u32::from_le_bytes(slice.try_into().expect("length checked above")))
}

/// Read an OPC UA `String`: a 4-byte little-endian length followed by UTF-8 bytes, where
/// length `0xFFFFFFFF` denotes the null string.
fn read_string(buf: &[u8], at: &mut usize) -> Result<String> {
	let len = read_u32(buf, *at)?;
	*at += 4;

	if len == u32::MAX {
		return Ok(String::new());
	}

	let len = len as usize;
	let bytes = buf.get(*at..*at + len).ok_or_else(|| fail!(StatusCode::BadTcpInternalError, "String body shorter than declared length"))?;
	*at += len;

	String::from_utf8(bytes.to_vec()).map_err(|_| fail!(StatusCode::BadTcpInternalError, "String body is not valid UTF-8"))
}

fn write_string(out: &mut Vec<u8>, value: &str) {
	if value.is_empty() {
		out.extend_from_slice(&u32::MAX.to_le_bytes());
	} else {
		out.extend_from_slice(&(value.len() as u32).to_le_bytes());
		out.extend_from_slice(value.as_bytes());
	}
}

/// Read an OPC UA `ByteString`: identical layout to `String`, opaque bytes instead of UTF-8.
fn read_bytestring(buf: &[u8], at: &mut usize) -> Result<Vec<u8>> {
	let len = read_u32(buf, *at)?;
	*at += 4;

	if len == u32::MAX {
		return Ok(Vec::new());
	}

	let len = len as usize;
	let bytes = buf.get(*at..*at + len).ok_or_else(|| fail!(StatusCode::BadTcpInternalError, "ByteString body shorter than declared length"))?;
	*at += len;

	Ok(bytes.to_vec())
}

fn write_bytestring(out: &mut Vec<u8>, value: &[u8]) {
	if value.is_empty() {
		out.extend_from_slice(&u32::MAX.to_le_bytes());
	} else {
		out.extend_from_slice(&(value.len() as u32).to_le_bytes());
		out.extend_from_slice(value);
	}
}

/// HEL / ACK shared transport properties.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnectionProperties {
	pub protocol_version: u32,
	pub receive_buffer_size: u32,
	pub send_buffer_size: u32,
	pub max_message_size: u32,
	pub max_chunk_count: u32,
}

#[derive(Debug, Clone)]
pub struct HelloBody {
	pub props: TcpConnectionProperties,
	pub endpoint_url: String,
}

impl HelloBody {
	pub fn encode(&self) -> Result<Vec<u8>> {
		if self.endpoint_url.len() > crate::wire::MAX_URL_LENGTH {
			return Err(fail!(StatusCode::BadTcpEndpointUrlInvalid, "Endpoint URL exceeds {} bytes", crate::wire::MAX_URL_LENGTH));
		}

		let mut out = Vec::with_capacity(20 + self.endpoint_url.len());
		out.extend_from_slice(&self.props.protocol_version.to_le_bytes());
		out.extend_from_slice(&self.props.receive_buffer_size.to_le_bytes());
		out.extend_from_slice(&self.props.send_buffer_size.to_le_bytes());
		out.extend_from_slice(&self.props.max_message_size.to_le_bytes());
		out.extend_from_slice(&self.props.max_chunk_count.to_le_bytes());
		write_string(&mut out, &self.endpoint_url);
		Ok(out)
	}

	pub fn decode(buf: &[u8]) -> Result<Self> {
		let mut at = 0;
		let props = TcpConnectionProperties {
			protocol_version: read_u32(buf, at)?,
			receive_buffer_size: read_u32(buf, { at += 4; at })?,
			send_buffer_size: read_u32(buf, { at += 4; at })?,
			max_message_size: read_u32(buf, { at += 4; at })?,
			max_chunk_count: read_u32(buf, { at += 4; at })?,
		};
		at += 4;

		let endpoint_url = read_string(buf, &mut at)?;
		if endpoint_url.len() > crate::wire::MAX_URL_LENGTH {
			return Err(fail!(StatusCode::BadTcpEndpointUrlInvalid, "Endpoint URL exceeds {} bytes", crate::wire::MAX_URL_LENGTH));
		}

		Ok(Self { props, endpoint_url })
	}
}

#[derive(Debug, Clone, Copy)]
pub struct AcknowledgeBody {
	pub props: TcpConnectionProperties,
}

impl AcknowledgeBody {
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(20);
		out.extend_from_slice(&self.props.protocol_version.to_le_bytes());
		out.extend_from_slice(&self.props.receive_buffer_size.to_le_bytes());
		out.extend_from_slice(&self.props.send_buffer_size.to_le_bytes());
		out.extend_from_slice(&self.props.max_message_size.to_le_bytes());
		out.extend_from_slice(&self.props.max_chunk_count.to_le_bytes());
		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self> {
		let mut at = 0;
		let props = TcpConnectionProperties {
			protocol_version: read_u32(buf, at)?,
			receive_buffer_size: read_u32(buf, { at += 4; at })?,
			send_buffer_size: read_u32(buf, { at += 4; at })?,
			max_message_size: read_u32(buf, { at += 4; at })?,
			max_chunk_count: read_u32(buf, { at += 4; at })?,
		};
		Ok(Self { props })
	}
}

#[derive(Debug, Clone)]
pub struct ErrorBody {
	pub error: StatusCode,
	pub reason: String,
}

impl ErrorBody {
	/// Build an ERR body, blanking the reason when the cause is security-sensitive so a
	/// remote peer can't use it as an oracle.
	pub fn for_failure(error: StatusCode, reason: &str) -> Self {
		let reason = if error.is_security_sensitive() { String::new() } else { reason.to_string() };
		Self { error, reason }
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(8 + self.reason.len());
		out.extend_from_slice(&self.error.to_wire().to_le_bytes());
		write_string(&mut out, &self.reason);
		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self> {
		let mut at = 4;
		let error = StatusCode::from_wire(read_u32(buf, 0)?);
		let reason = read_string(buf, &mut at)?;
		Ok(Self { error, reason })
	}
}

/// The OpenSecureChannel request body (Part 4, 5.5.2): everything the channel layer needs
/// to issue or renew a token.
#[derive(Debug, Clone)]
pub struct OpenRequest {
	pub request_handle: u32,
	pub client_protocol_version: u32,
	pub request_type: RequestType,
	pub security_mode: SecurityMode,
	pub client_nonce: Vec<u8>,
	pub requested_lifetime_ms: u32,
}

impl OpenRequest {
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(32 + self.client_nonce.len());
		out.extend_from_slice(&self.request_handle.to_le_bytes());
		out.extend_from_slice(&self.client_protocol_version.to_le_bytes());
		out.extend_from_slice(&self.request_type.to_wire().to_le_bytes());
		out.extend_from_slice(&self.security_mode.to_wire().to_le_bytes());
		write_bytestring(&mut out, &self.client_nonce);
		out.extend_from_slice(&self.requested_lifetime_ms.to_le_bytes());
		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self> {
		let request_handle = read_u32(buf, 0)?;
		let client_protocol_version = read_u32(buf, 4)?;
		let request_type = RequestType::from_wire(read_u32(buf, 8)?)
			.ok_or_else(|| fail!(StatusCode::BadTcpMessageTypeInvalid, "Unknown OpenSecureChannel request type"))?;
		let security_mode = SecurityMode::from_wire(read_u32(buf, 12)?)
			.ok_or_else(|| fail!(StatusCode::BadInvalidArgument, "Unknown security mode in OpenSecureChannel request"))?;

		let mut at = 16;
		let client_nonce = read_bytestring(buf, &mut at)?;
		let requested_lifetime_ms = read_u32(buf, at)?;

		Ok(Self { request_handle, client_protocol_version, request_type, security_mode, client_nonce, requested_lifetime_ms })
	}
}

/// The OpenSecureChannel response body (Part 4, 5.5.2).
#[derive(Debug, Clone)]
pub struct OpenResponse {
	pub request_handle: u32,
	pub service_result: StatusCode,
	pub server_protocol_version: u32,
	pub channel_id: u32,
	pub token_id: u32,
	pub created_at_unix: u32,
	pub revised_lifetime_ms: u32,
	pub server_nonce: Vec<u8>,
}

impl OpenResponse {
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(40 + self.server_nonce.len());
		out.extend_from_slice(&self.request_handle.to_le_bytes());
		out.extend_from_slice(&self.service_result.to_wire().to_le_bytes());
		out.extend_from_slice(&self.server_protocol_version.to_le_bytes());
		out.extend_from_slice(&self.channel_id.to_le_bytes());
		out.extend_from_slice(&self.token_id.to_le_bytes());
		out.extend_from_slice(&self.created_at_unix.to_le_bytes());
		out.extend_from_slice(&self.revised_lifetime_ms.to_le_bytes());
		write_bytestring(&mut out, &self.server_nonce);
		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self> {
		let request_handle = read_u32(buf, 0)?;
		let service_result = StatusCode::from_wire(read_u32(buf, 4)?);
		let server_protocol_version = read_u32(buf, 8)?;
		let channel_id = read_u32(buf, 12)?;
		let token_id = read_u32(buf, 16)?;
		let created_at_unix = read_u32(buf, 20)?;
		let revised_lifetime_ms = read_u32(buf, 24)?;

		let mut at = 28;
		let server_nonce = read_bytestring(buf, &mut at)?;

		Ok(Self { request_handle, service_result, server_protocol_version, channel_id, token_id, created_at_unix, revised_lifetime_ms, server_nonce })
	}
}

/// CloseSecureChannel carries nothing the channel layer inspects beyond the request handle
/// (used to echo a response on the rare transport that still expects one); most stacks,
/// this one included, treat the arrival of CLO itself as the operative signal.
#[derive(Debug, Clone, Copy)]
pub struct CloseRequest {
	pub request_handle: u32,
}

impl CloseRequest {
	pub fn encode(&self) -> Vec<u8> {
		self.request_handle.to_le_bytes().to_vec()
	}

	pub fn decode(buf: &[u8]) -> Result<Self> {
		Ok(Self { request_handle: read_u32(buf, 0)? })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn props() -> TcpConnectionProperties {
		TcpConnectionProperties { protocol_version: 0, receive_buffer_size: 8192, send_buffer_size: 8192, max_message_size: 65536, max_chunk_count: 1 }
	}

	#[test]
	fn hello_round_trips() {
		let hello = HelloBody { props: props(), endpoint_url: "opc.tcp://localhost:4840".into() };
		let encoded = hello.encode().unwrap();
		let decoded = HelloBody::decode(&encoded).unwrap();

		assert_eq!(decoded.endpoint_url, hello.endpoint_url);
		assert_eq!(decoded.props.receive_buffer_size, hello.props.receive_buffer_size);
	}

	#[test]
	fn hello_rejects_oversize_url() {
		let hello = HelloBody { props: props(), endpoint_url: "x".repeat(crate::wire::MAX_URL_LENGTH + 1) };
		assert!(hello.encode().is_err());
	}

	#[test]
	fn error_blanks_reason_for_security_failures() {
		let err = ErrorBody::for_failure(StatusCode::BadSecurityChecksFailed, "decrypt failed: bad padding");
		assert!(err.reason.is_empty());

		let err = ErrorBody::for_failure(StatusCode::BadTcpMessageTooLarge, "frame too large");
		assert_eq!(err.reason, "frame too large");
	}

	#[test]
	fn error_round_trips() {
		let err = ErrorBody { error: StatusCode::BadTcpMessageTooLarge, reason: "too big".into() };
		let decoded = ErrorBody::decode(&err.encode()).unwrap();
		assert_eq!(decoded.error, StatusCode::BadTcpMessageTooLarge);
		assert_eq!(decoded.reason, "too big");
	}

	#[test]
	fn open_request_round_trips() {
		let req = OpenRequest {
			request_handle: 7,
			client_protocol_version: 0,
			request_type: RequestType::Issue,
			security_mode: SecurityMode::SignAndEncrypt,
			client_nonce: vec![1, 2, 3, 4],
			requested_lifetime_ms: 60_000,
		};

		let decoded = OpenRequest::decode(&req.encode()).unwrap();
		assert_eq!(decoded.request_handle, 7);
		assert_eq!(decoded.request_type, RequestType::Issue);
		assert_eq!(decoded.security_mode, SecurityMode::SignAndEncrypt);
		assert_eq!(decoded.client_nonce, vec![1, 2, 3, 4]);
		assert_eq!(decoded.requested_lifetime_ms, 60_000);
	}

	#[test]
	fn open_response_round_trips() {
		let resp = OpenResponse {
			request_handle: 7,
			service_result: StatusCode::Good,
			server_protocol_version: 0,
			channel_id: 42,
			token_id: 1,
			created_at_unix: 1_700_000_000,
			revised_lifetime_ms: 60_000,
			server_nonce: vec![9, 9, 9],
		};

		let decoded = OpenResponse::decode(&resp.encode()).unwrap();
		assert_eq!(decoded.channel_id, 42);
		assert_eq!(decoded.token_id, 1);
		assert_eq!(decoded.server_nonce, vec![9, 9, 9]);
	}
}
