//! Per-chunk encode: security-header write, padding, signature and encryption. Chunk
//! *planning* — how many chunks a body needs and how large each may be — is also handled
//! here since it's inseparable from the crypto overhead each chunk carries.

use rsa::{RsaPrivateKey, RsaPublicKey};
use sc_crypto::SecurityPolicy;
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;

use super::header::{AsymmetricSecurityHeader, MessageHeader, SequenceHeader, SymmetricSecurityHeader};
use crate::wire::{Final, MessageType, SECURE_MESSAGE_HEADER_SIZE, SEQUENCE_HEADER_SIZE, SYMMETRIC_SECURITY_HEADER_SIZE};

/// Pad `plain` so its length is a multiple of `block_size`, per the convention that every
/// padding byte carries the value `paddingSize - 1`. A no-op when
/// `block_size <= 1` (the `None` policy, or a chunk that isn't being encrypted).
fn append_padding(plain: &mut Vec<u8>, block_size: usize) {
	if block_size <= 1 {
		return;
	}

	let remainder = plain.len() % block_size;
	let pad_size = if remainder == 0 { block_size } else { block_size - remainder };

	plain.resize(plain.len() + pad_size, (pad_size - 1) as u8);
}

/// The symmetric key material needed to sign and encrypt one chunk, borrowed from the
/// connection's active (`currentKeys`) token.
pub struct SymmetricSenderKeys<'a> {
	pub signing_key: &'a [u8],
	pub encryption_key: &'a [u8],
	pub iv: &'a [u8],
}

/// Largest body (post sequence-header) a single symmetric chunk can carry for the given
/// `send_buffer_size` and policy overhead.
pub fn symmetric_chunk_capacity(send_buffer_size: u32, policy: &dyn SecurityPolicy) -> usize {
	let fixed = SECURE_MESSAGE_HEADER_SIZE + SYMMETRIC_SECURITY_HEADER_SIZE + SEQUENCE_HEADER_SIZE;
	let overhead = fixed + policy.symmetric_signature_size() + policy.symmetric_block_size().max(1);
	(send_buffer_size as usize).saturating_sub(overhead)
}

/// Split `body` into one or more chunks no larger than `chunk_capacity`, failing if the
/// result would exceed `max_chunk_count` (0 meaning unbounded).
fn plan_body_chunks(body: &[u8], chunk_capacity: usize, max_chunk_count: u32) -> Result<Vec<&[u8]>> {
	if chunk_capacity == 0 {
		return Err(fail!(StatusCode::BadResponseTooLarge, "Send buffer leaves no room for a chunk body"));
	}

	let chunks: Vec<&[u8]> = if body.is_empty() { vec![&body[..0]] } else { body.chunks(chunk_capacity).collect() };

	if max_chunk_count != 0 && chunks.len() as u32 > max_chunk_count {
		return Err(fail!(StatusCode::BadResponseTooLarge, "Body needs {} chunks, budget is {}", chunks.len(), max_chunk_count));
	}

	Ok(chunks)
}

/// Encode a symmetric (MSG/CLO) logical message into one or more wire chunks, assigning a
/// fresh strictly-increasing `sequenceNumber` to each. `next_sequence`
/// is the connection's `sequenceNumberSent` counter, advanced by one per chunk emitted.
#[allow(clippy::too_many_arguments)]
pub fn encode_symmetric(
	msg_type: MessageType,
	secure_channel_id: u32,
	token_id: u32,
	request_id: u32,
	body: &[u8],
	send_buffer_size: u32,
	max_chunk_count: u32,
	encrypted: bool,
	policy: &dyn SecurityPolicy,
	sender: SymmetricSenderKeys,
	next_sequence: &mut u32,
) -> Result<Vec<Vec<u8>>> {
	let capacity = symmetric_chunk_capacity(send_buffer_size, policy);
	let body_chunks = plan_body_chunks(body, capacity, max_chunk_count)?;
	let last = body_chunks.len() - 1;

	let mut chunks = Vec::with_capacity(body_chunks.len());

	for (i, chunk_body) in body_chunks.into_iter().enumerate() {
		let is_final = if i == last { Final::Final } else { Final::Intermediate };

		let mut out = Vec::new();
		MessageHeader { msg_type, is_final, message_size: 0, secure_channel_id }.write(&mut out);
		SymmetricSecurityHeader { token_id }.write(&mut out);
		let sec_header_end = out.len();

		let sequence_number = *next_sequence;
		*next_sequence = next_sequence.wrapping_add(1);

		let mut plain = Vec::with_capacity(SEQUENCE_HEADER_SIZE + chunk_body.len() + policy.symmetric_block_size() + policy.symmetric_signature_size());
		SequenceHeader { sequence_number, request_id }.write(&mut plain);
		plain.extend_from_slice(chunk_body);

		if encrypted {
			append_padding(&mut plain, policy.symmetric_block_size());
		}

		let mut to_sign = Vec::with_capacity(sec_header_end + plain.len());
		to_sign.extend_from_slice(&out);
		to_sign.extend_from_slice(&plain);
		let signature = policy.sign_symmetric(sender.signing_key, &to_sign)?;
		plain.extend_from_slice(&signature);

		if encrypted {
			policy.encrypt_symmetric(sender.encryption_key, sender.iv, &mut plain)?;
		}

		out.extend_from_slice(&plain);
		let message_size = out.len() as u32;
		MessageHeader::patch_message_size(&mut out, message_size);

		chunks.push(out);
	}

	Ok(chunks)
}

/// Encode an asymmetric (OPN) logical message into a single wire chunk. OPN bodies are the
/// handshake request/response only, always small enough for one chunk; unlike
/// [`encode_symmetric`] this never plans for more than one.
#[allow(clippy::too_many_arguments)]
pub fn encode_asymmetric(
	msg_type: MessageType,
	secure_channel_id: u32,
	request_id: u32,
	body: &[u8],
	send_buffer_size: u32,
	signed: bool,
	encrypted: bool,
	policy: &dyn SecurityPolicy,
	policy_uri: &str,
	local_certificate: &[u8],
	local_private_key: Option<&RsaPrivateKey>,
	peer_public_key: Option<&RsaPublicKey>,
	peer_thumbprint: &[u8],
	sequence_number: u32,
) -> Result<Vec<u8>> {
	let sec_header = AsymmetricSecurityHeader {
		policy_uri: policy_uri.to_string(),
		sender_certificate: local_certificate.to_vec(),
		receiver_thumbprint: peer_thumbprint.to_vec(),
	};

	let mut out = Vec::new();
	MessageHeader { msg_type, is_final: Final::Final, message_size: 0, secure_channel_id }.write(&mut out);
	sec_header.write(&mut out);
	let sec_header_end = out.len();

	let mut plain = Vec::with_capacity(SEQUENCE_HEADER_SIZE + body.len() + 64);
	SequenceHeader { sequence_number, request_id }.write(&mut plain);
	plain.extend_from_slice(body);

	let key_size = local_private_key.map(|k| k.size());

	if encrypted {
		let key_size = key_size.ok_or_else(|| fail!(StatusCode::BadSecurityChecksFailed, "No local private key sized for OPN padding"))?;
		append_padding(&mut plain, policy.asymmetric_plaintext_block_size(key_size));
	}

	if signed {
		let key = local_private_key.ok_or_else(|| fail!(StatusCode::BadSecurityChecksFailed, "No local private key to sign OPN chunk"))?;

		let mut to_sign = Vec::with_capacity(sec_header_end + plain.len());
		to_sign.extend_from_slice(&out);
		to_sign.extend_from_slice(&plain);
		let signature = policy.sign_asymmetric(key, &to_sign)?;
		plain.extend_from_slice(&signature);
	}

	let ciphertext = if encrypted {
		let key_size = key_size.expect("checked above");
		let peer_key = peer_public_key.ok_or_else(|| fail!(StatusCode::BadSecurityChecksFailed, "No peer public key to encrypt OPN chunk"))?;
		let pt_block = policy.asymmetric_plaintext_block_size(key_size);

		if pt_block == 0 || plain.len() % pt_block != 0 {
			return Err(fail!(StatusCode::BadTcpInternalError, "OPN plaintext is not aligned to the RSA plaintext block size"));
		}

		let mut ct = Vec::with_capacity(plain.len());
		for block in plain.chunks(pt_block) {
			ct.extend_from_slice(&policy.encrypt_asymmetric(peer_key, block)?);
		}
		ct
	} else {
		plain
	};

	out.extend_from_slice(&ciphertext);

	if out.len() as u32 > send_buffer_size {
		return Err(fail!(StatusCode::BadResponseTooLarge, "OPN chunk ({} bytes) exceeds send buffer ({} bytes)", out.len(), send_buffer_size));
	}

	let message_size = out.len() as u32;
	MessageHeader::patch_message_size(&mut out, message_size);

	Ok(out)
}

#[cfg(test)]
mod tests {
	use sc_crypto::policy::{Basic256Sha256, NoSecurity};

	use super::*;
	use crate::chunk::decode;

	#[test]
	fn symmetric_round_trip_none_policy() {
		let policy = NoSecurity;
		let keys = SymmetricSenderKeys { signing_key: &[], encryption_key: &[], iv: &[] };
		let mut seq = 51;

		let chunks = encode_symmetric(MessageType::Msg, 7, 1, 9, b"hello secure channel", 8192, 1, false, &policy, keys, &mut seq).unwrap();

		assert_eq!(chunks.len(), 1);

		let receiver = decode::SymmetricReceiverKeys { signing_key: &[], encryption_key: &[], iv: &[] };
		let (sec, seq_header, body) = decode::decode_symmetric(&chunks[0], &policy, false, receiver).unwrap();

		assert_eq!(sec.token_id, 1);
		assert_eq!(seq_header.request_id, 9);
		assert_eq!(seq_header.sequence_number, 51);
		assert_eq!(body, b"hello secure channel");
	}

	#[test]
	fn symmetric_round_trip_signed_and_encrypted() {
		let policy = Basic256Sha256;
		let signing_key = [1u8; 32];
		let encryption_key = [2u8; 32];
		let iv = [3u8; 16];
		let mut seq = 51;

		let sender = SymmetricSenderKeys { signing_key: &signing_key, encryption_key: &encryption_key, iv: &iv };
		let chunks = encode_symmetric(MessageType::Msg, 7, 1, 9, b"a body that needs padding", 8192, 1, true, &policy, sender, &mut seq).unwrap();

		let receiver = decode::SymmetricReceiverKeys { signing_key: &signing_key, encryption_key: &encryption_key, iv: &iv };
		let (_, seq_header, body) = decode::decode_symmetric(&chunks[0], &policy, true, receiver).unwrap();

		assert_eq!(seq_header.sequence_number, 51);
		assert_eq!(body, b"a body that needs padding");
	}

	#[test]
	fn symmetric_body_splits_across_chunks_when_oversize() {
		let policy = NoSecurity;
		let keys = SymmetricSenderKeys { signing_key: &[], encryption_key: &[], iv: &[] };
		let mut seq = 51;

		let body = vec![0xABu8; 500];
		let chunks = encode_symmetric(MessageType::Msg, 7, 1, 9, &body, 256, 5, false, &policy, keys, &mut seq).unwrap();

		assert!(chunks.len() >= 2);

		let header_last = MessageHeader::read(chunks.last().unwrap()).unwrap();
		assert_eq!(header_last.is_final, Final::Final);

		for chunk in &chunks[..chunks.len() - 1] {
			let h = MessageHeader::read(chunk).unwrap();
			assert_eq!(h.is_final, Final::Intermediate);
		}
	}

	#[test]
	fn symmetric_body_over_chunk_budget_fails() {
		let policy = NoSecurity;
		let keys = SymmetricSenderKeys { signing_key: &[], encryption_key: &[], iv: &[] };
		let mut seq = 51;

		let body = vec![0xABu8; 5000];
		let err = encode_symmetric(MessageType::Msg, 7, 1, 9, &body, 256, 1, false, &policy, keys, &mut seq).unwrap_err();
		assert_eq!(err, StatusCode::BadResponseTooLarge);
	}

	#[test]
	fn asymmetric_round_trip_none_policy() {
		let policy = NoSecurity;

		let chunk = encode_asymmetric(
			MessageType::Opn,
			0,
			1,
			b"OpenSecureChannel request body",
			8192,
			false,
			false,
			&policy,
			"http://opcfoundation.org/UA/SecurityPolicy#None",
			&[],
			None,
			None,
			&[],
			51,
		)
		.unwrap();

		let (sec, seq, body) = decode::decode_asymmetric(&chunk, &policy, false, false, None, None).unwrap();
		assert_eq!(sec.policy_uri, "http://opcfoundation.org/UA/SecurityPolicy#None");
		assert_eq!(seq.sequence_number, 51);
		assert_eq!(body, b"OpenSecureChannel request body");
	}

	#[test]
	fn asymmetric_round_trip_signed_and_encrypted() {
		use rsa::RsaPrivateKey;

		let policy = Basic256Sha256;
		let mut rng = rand::thread_rng();

		let client_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
		let server_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
		let server_pub = server_key.to_public_key();
		let client_pub = client_key.to_public_key();

		let chunk = encode_asymmetric(
			MessageType::Opn,
			0,
			1,
			b"OpenSecureChannel request body",
			8192,
			true,
			true,
			&policy,
			"http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
			b"client certificate bytes",
			Some(&client_key),
			Some(&server_pub),
			b"server thumbprint",
			51,
		)
		.unwrap();

		let (_, seq, body) = decode::decode_asymmetric(&chunk, &policy, true, true, Some(&server_key), Some(&client_pub)).unwrap();
		assert_eq!(seq.sequence_number, 51);
		assert_eq!(body, b"OpenSecureChannel request body");
	}
}
