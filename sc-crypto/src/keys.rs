use hmac::{Hmac, Mac};
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::secret::Secret;
use sc_utils::status::StatusCode;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The three pieces of key material carried by one direction of a secure channel: the key
/// used to compute the symmetric signature, the key used for block-cipher encryption, and
/// the initialization vector the cipher starts from. All three are wiped on drop.
pub struct DerivedKeys {
	pub signing_key: Secret,
	pub encryption_key: Secret,
	pub iv: Secret,
}

/// `P_SHA256`, the pseudo-random function OPC UA uses to turn a shared secret and a peer's
/// nonce into key material. It is the same construction as the TLS 1.2 PRF restricted to
/// SHA-256: repeatedly HMAC the secret with a chained seed, concatenating the output until
/// `length` bytes have been produced.
fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> Result<Vec<u8>> {
	let mut out = Vec::with_capacity(length + 32);

	let mut a = HmacSha256::new_from_slice(secret)
		.map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "Key derivation secret has an invalid length"))?
		.chain_update(seed)
		.finalize()
		.into_bytes();

	while out.len() < length {
		let mut round = HmacSha256::new_from_slice(secret).expect("key accepted above");
		round.update(&a);
		round.update(seed);
		out.extend_from_slice(&round.finalize().into_bytes());

		let mut next = HmacSha256::new_from_slice(secret).expect("key accepted above");
		next.update(&a);
		a = next.finalize().into_bytes();
	}

	out.truncate(length);
	Ok(out)
}

/// Derive one direction's signing key, encryption key and IV from a shared secret and the
/// peer's nonce, per the lengths the given policy declares.
pub fn derive(secret: &[u8], seed: &[u8], signing_len: usize, encryption_len: usize, iv_len: usize) -> Result<DerivedKeys> {
	let mut bytes = p_sha256(secret, seed, signing_len + encryption_len + iv_len)?;

	let iv = bytes.split_off(signing_len + encryption_len);
	let encryption_key = bytes.split_off(signing_len);
	let signing_key = bytes;

	Ok(DerivedKeys { signing_key: signing_key.into(), encryption_key: encryption_key.into(), iv: iv.into() })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn p_sha256_is_deterministic_and_sized() {
		let a = p_sha256(b"shared secret", b"client nonce", 100).unwrap();
		let b = p_sha256(b"shared secret", b"client nonce", 100).unwrap();

		assert_eq!(a.len(), 100);
		assert_eq!(a, b);
	}

	#[test]
	fn p_sha256_differs_with_seed() {
		let a = p_sha256(b"shared secret", b"client nonce", 64).unwrap();
		let b = p_sha256(b"shared secret", b"server nonce", 64).unwrap();

		assert_ne!(a, b);
	}

	#[test]
	fn derive_splits_into_three_parts_of_requested_length() {
		let derived = derive(b"shared secret", b"nonce", 32, 32, 16).unwrap();

		assert_eq!(derived.signing_key.len(), 32);
		assert_eq!(derived.encryption_key.len(), 32);
		assert_eq!(derived.iv.len(), 16);
	}
}
