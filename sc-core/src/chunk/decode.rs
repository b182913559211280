//! Per-chunk decode: security-header parse, decrypt, signature verification, padding strip
//! and sequence-header validation. Chunk assembly (step 8) is
//! handled by [`super::ChunkAssembly`] one layer up, since it spans multiple chunks and
//! this module only ever sees one.

use rsa::{RsaPrivateKey, RsaPublicKey};
use sc_crypto::SecurityPolicy;
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;

use super::header::{AsymmetricSecurityHeader, MessageHeader, SequenceHeader, SymmetricSecurityHeader};
use crate::wire::SECURE_MESSAGE_HEADER_SIZE;

/// The symmetric key material needed to decrypt and verify one chunk, borrowed from
/// whichever of `currentKeys`/`precedentKeys` the chunk's token id resolved to.
pub struct SymmetricReceiverKeys<'a> {
	pub signing_key: &'a [u8],
	pub encryption_key: &'a [u8],
	pub iv: &'a [u8],
}

/// Split `plaintext` into `(signed_region, signature)`, stripping padding off the signed
/// region first if `encrypted`. The padding convention: the last
/// padding byte's value is `paddingSize - 1`, and padding immediately precedes the
/// signature.
fn split_padding_and_signature(plaintext: &mut [u8], signature_size: usize, encrypted: bool) -> Result<(&[u8], &[u8])> {
	if plaintext.len() < signature_size {
		return Err(fail!(StatusCode::BadSecurityChecksFailed, "Chunk shorter than its own signature"));
	}

	let (rest, signature) = plaintext.split_at(plaintext.len() - signature_size);

	let body_end = if encrypted && !rest.is_empty() {
		let pad_size = rest[rest.len() - 1] as usize + 1;
		if pad_size > rest.len() {
			return Err(fail!(StatusCode::BadSecurityChecksFailed, "Padding size exceeds plaintext length"));
		}
		rest.len() - pad_size
	} else {
		rest.len()
	};

	Ok((&rest[..body_end], signature))
}

/// Decode a symmetric (MSG/CLO) chunk's security header onward. `full_chunk` is the whole
/// chunk, including the already-parsed 12-byte message header.
pub fn decode_symmetric(
	full_chunk: &[u8],
	policy: &dyn SecurityPolicy,
	encrypted: bool,
	receiver: SymmetricReceiverKeys,
) -> Result<(SymmetricSecurityHeader, SequenceHeader, Vec<u8>)> {
	let sec_header = SymmetricSecurityHeader::read(&full_chunk[SECURE_MESSAGE_HEADER_SIZE..])?;
	let sec_header_end = SECURE_MESSAGE_HEADER_SIZE + crate::wire::SYMMETRIC_SECURITY_HEADER_SIZE;

	let mut region = full_chunk[sec_header_end..].to_vec();
	if encrypted {
		policy.decrypt_symmetric(receiver.encryption_key, receiver.iv, &mut region)?;
	}

	let sig_size = policy.symmetric_signature_size();
	let (signed_tail, signature) = split_padding_and_signature(&mut region, sig_size, encrypted)?;

	let mut signed = Vec::with_capacity(sec_header_end + signed_tail.len());
	signed.extend_from_slice(&full_chunk[..sec_header_end]);
	signed.extend_from_slice(signed_tail);
	policy.verify_symmetric(receiver.signing_key, &signed, signature)?;

	let plain = &signed[sec_header_end..];
	let seq = SequenceHeader::read(plain)?;
	let body = plain[crate::wire::SEQUENCE_HEADER_SIZE..].to_vec();

	Ok((sec_header, seq, body))
}

/// Decode an asymmetric (OPN) chunk's security header onward. `full_chunk` is the whole
/// chunk, including the already-parsed 12-byte message header.
///
/// `local_private_key` is required whenever `encrypted`; `sender_public_key` is required
/// whenever `signed` (it is recovered from the sender certificate carried in the security
/// header — certificate *trust* is a separate concern the caller has already checked via
/// [`sc_crypto::pki::Pki`]).
pub fn decode_asymmetric(
	full_chunk: &[u8],
	policy: &dyn SecurityPolicy,
	signed: bool,
	encrypted: bool,
	local_private_key: Option<&RsaPrivateKey>,
	sender_public_key: Option<&RsaPublicKey>,
) -> Result<(AsymmetricSecurityHeader, SequenceHeader, Vec<u8>)> {
	let (sec_header, consumed) = AsymmetricSecurityHeader::read(&full_chunk[SECURE_MESSAGE_HEADER_SIZE..])?;
	let sec_header_end = SECURE_MESSAGE_HEADER_SIZE + consumed;

	let ciphertext = &full_chunk[sec_header_end..];

	let region = if encrypted {
		let key = local_private_key.ok_or_else(|| fail!(StatusCode::BadSecurityChecksFailed, "No local private key to decrypt OPN chunk"))?;
		let block_size = policy.asymmetric_ciphertext_block_size(key.size());
		if block_size == 0 || ciphertext.len() % block_size != 0 {
			return Err(fail!(StatusCode::BadSecurityChecksFailed, "Asymmetric ciphertext is not a multiple of the RSA block size"));
		}

		let mut plain = Vec::with_capacity(ciphertext.len());
		for block in ciphertext.chunks(block_size) {
			plain.extend_from_slice(&policy.decrypt_asymmetric(key, block)?);
		}
		plain
	} else {
		ciphertext.to_vec()
	};

	let sig_size = if signed {
		sender_public_key.ok_or_else(|| fail!(StatusCode::BadSecurityChecksFailed, "No sender public key to verify OPN chunk"))?.size()
	} else {
		0
	};

	let mut region = region;
	let (signed_tail, signature) = split_padding_and_signature(&mut region, sig_size, encrypted)?;

	let mut signed_bytes = Vec::with_capacity(sec_header_end + signed_tail.len());
	signed_bytes.extend_from_slice(&full_chunk[..sec_header_end]);
	signed_bytes.extend_from_slice(signed_tail);

	if signed {
		let key = sender_public_key.expect("checked above");
		policy.verify_asymmetric(key, &signed_bytes, signature)?;
	}

	let plain = &signed_bytes[sec_header_end..];
	let seq = SequenceHeader::read(plain)?;
	let body = plain[crate::wire::SEQUENCE_HEADER_SIZE..].to_vec();

	Ok((sec_header, seq, body))
}

/// Validate an incoming `sequenceNumber` against the previous one received on this
/// connection, tolerating the wraparound window.
pub fn check_sequence_number(previous: Option<u32>, incoming: u32) -> Result {
	let Some(previous) = previous else { return Ok(()) };

	if incoming > previous {
		return Ok(());
	}

	if previous > crate::wire::SEQUENCE_WRAP_THRESHOLD && incoming <= crate::wire::SEQUENCE_WRAP_LOW_WATERMARK {
		return Ok(());
	}

	Err(fail!(StatusCode::BadSecurityChecksFailed, "Sequence number {incoming} is not strictly greater than previous {previous}"))
}

/// Re-parse just the fixed message header, used by the connection FSM to decide framing
/// before dispatching into the rest of this module.
pub fn read_message_header(buf: &[u8]) -> Result<MessageHeader> {
	MessageHeader::read(buf)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sequence_number_accepts_strictly_increasing() {
		assert!(check_sequence_number(Some(51), 52).is_ok());
		assert!(check_sequence_number(None, 51).is_ok());
	}

	#[test]
	fn sequence_number_rejects_replay() {
		assert!(check_sequence_number(Some(52), 52).is_err());
		assert!(check_sequence_number(Some(52), 51).is_err());
	}

	#[test]
	fn sequence_number_tolerates_wraparound() {
		assert!(check_sequence_number(Some(u32::MAX - 500), 10).is_ok());
		// Near the rollover but not past the threshold: still a normal replay/reorder.
		assert!(check_sequence_number(Some(100), 10).is_err());
	}
}
