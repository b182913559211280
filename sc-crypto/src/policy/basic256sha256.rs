use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;
use sha2::{Digest, Sha256};

use crate::keys::{self, DerivedKeys};
use crate::provider::SecurityPolicy;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_SIZE: usize = 32;
const KEY_SIZE: usize = 32;
const BLOCK_SIZE: usize = 16;

/// `http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256`: RSA-OAEP-SHA256 for the
/// asymmetric layer, AES-256-CBC plus HMAC-SHA256 for the symmetric layer.
pub struct Basic256Sha256;

impl SecurityPolicy for Basic256Sha256 {
	fn uri(&self) -> &'static str { "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256" }

	fn symmetric_signature_size(&self) -> usize { SIGNATURE_SIZE }

	fn symmetric_key_size(&self) -> usize { KEY_SIZE }

	fn symmetric_block_size(&self) -> usize { BLOCK_SIZE }

	fn derive_keys(&self, secret: &[u8], seed: &[u8]) -> Result<DerivedKeys> { keys::derive(secret, seed, SIGNATURE_SIZE, KEY_SIZE, BLOCK_SIZE) }

	fn sign_symmetric(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
		let mut mac =
			HmacSha256::new_from_slice(key).map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "Symmetric signing key has an invalid length"))?;
		mac.update(data);
		Ok(mac.finalize().into_bytes().to_vec())
	}

	fn verify_symmetric(&self, key: &[u8], data: &[u8], signature: &[u8]) -> Result {
		let mut mac =
			HmacSha256::new_from_slice(key).map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "Symmetric signing key has an invalid length"))?;
		mac.update(data);
		mac.verify_slice(signature).map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "Symmetric signature verification failed"))
	}

	fn encrypt_symmetric(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result {
		let cipher = Aes256CbcEnc::new_from_slices(key, iv)
			.map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "Symmetric encryption key or IV has an invalid length"))?;

		let len = data.len();

		cipher
			.encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(data, len)
			.map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "Plaintext is not a multiple of the cipher block size"))?;

		Ok(())
	}

	fn decrypt_symmetric(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result {
		let cipher = Aes256CbcDec::new_from_slices(key, iv)
			.map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "Symmetric decryption key or IV has an invalid length"))?;

		cipher
			.decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(data)
			.map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "Ciphertext is not a multiple of the cipher block size"))?;

		Ok(())
	}

	fn asymmetric_signature_size(&self, key: &RsaPrivateKey) -> usize { key.size() }

	fn asymmetric_plaintext_block_size(&self, key_size_bytes: usize) -> usize {
		// RSA-OAEP with SHA-256 loses 2 * hash_len + 2 bytes of the modulus to padding.
		key_size_bytes.saturating_sub(2 * SIGNATURE_SIZE + 2)
	}

	fn asymmetric_ciphertext_block_size(&self, key_size_bytes: usize) -> usize { key_size_bytes }

	fn encrypt_asymmetric(&self, key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
		key.encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), data)
			.map_err(|err| fail!(StatusCode::BadSecurityChecksFailed, "RSA-OAEP encryption failed: {err}"))
	}

	fn decrypt_asymmetric(&self, key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
		key.decrypt(Oaep::new::<Sha256>(), data).map_err(|err| fail!(StatusCode::BadSecurityChecksFailed, "RSA-OAEP decryption failed: {err}"))
	}

	fn sign_asymmetric(&self, key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
		let digest = Sha256::digest(data);
		key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).map_err(|err| fail!(StatusCode::BadSecurityChecksFailed, "RSA signing failed: {err}"))
	}

	fn verify_asymmetric(&self, key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result {
		let digest = Sha256::digest(data);
		key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
			.map_err(|_| fail!(StatusCode::BadSecurityChecksFailed, "RSA signature verification failed"))
	}
}

#[cfg(test)]
mod tests {
	use rsa::RsaPrivateKey;

	use super::*;

	#[test]
	fn symmetric_round_trip() {
		let policy = Basic256Sha256;
		let key = [7u8; KEY_SIZE];
		let iv = [9u8; BLOCK_SIZE];

		let mut data = b"exactly two blocks of plaintext".to_vec();
		assert_eq!(data.len() % BLOCK_SIZE, 0);
		let plaintext = data.clone();

		policy.encrypt_symmetric(&key, &iv, &mut data).unwrap();
		assert_ne!(data, plaintext);

		policy.decrypt_symmetric(&key, &iv, &mut data).unwrap();
		assert_eq!(data, plaintext);
	}

	#[test]
	fn symmetric_signature_round_trip() {
		let policy = Basic256Sha256;
		let key = [3u8; KEY_SIZE];
		let data = b"OpenSecureChannel chunk body";

		let sig = policy.sign_symmetric(&key, data).unwrap();
		assert_eq!(sig.len(), SIGNATURE_SIZE);
		assert!(policy.verify_symmetric(&key, data, &sig).is_ok());

		let mut tampered = data.to_vec();
		tampered[0] ^= 0xFF;
		assert!(policy.verify_symmetric(&key, &tampered, &sig).is_err());
	}

	#[test]
	fn asymmetric_round_trip() {
		let mut rng = rand::thread_rng();
		let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
		let public = private.to_public_key();

		let policy = Basic256Sha256;
		let plaintext = b"a client nonce or other short secret";

		let ciphertext = policy.encrypt_asymmetric(&public, plaintext).unwrap();
		let decrypted = policy.decrypt_asymmetric(&private, &ciphertext).unwrap();
		assert_eq!(decrypted, plaintext);

		let signature = policy.sign_asymmetric(&private, plaintext).unwrap();
		assert!(policy.verify_asymmetric(&public, plaintext, &signature).is_ok());
	}
}
