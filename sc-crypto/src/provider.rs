use rsa::{RsaPrivateKey, RsaPublicKey};
use sc_utils::error::Result;

use crate::keys::DerivedKeys;

/// A security policy as defined by the OPC UA security policy table: the set of algorithms
/// and key lengths a secure channel negotiates and then uses for every chunk it signs,
/// encrypts, verifies and decrypts until the channel closes.
///
/// Implementations are stateless; all per-channel state (the derived keys themselves, the
/// local and remote nonces) lives in the secure-connection FSM and is passed in on each call.
pub trait SecurityPolicy: Send + Sync {
	/// The policy's URI, as carried in the asymmetric security header.
	fn uri(&self) -> &'static str;

	/// Length in bytes of a symmetric signature (0 for the `None` policy).
	fn symmetric_signature_size(&self) -> usize;

	/// Length in bytes of the symmetric encryption key (0 for the `None` policy).
	fn symmetric_key_size(&self) -> usize;

	/// Block size in bytes of the symmetric cipher (1 for the `None` policy, meaning no
	/// padding is required).
	fn symmetric_block_size(&self) -> usize;

	/// Derive the three pieces of symmetric key material for one direction of the channel
	/// from the shared secret and the peer's nonce.
	fn derive_keys(&self, secret: &[u8], seed: &[u8]) -> Result<DerivedKeys>;

	/// Compute the symmetric signature over `data` using `key`. Empty for the `None` policy.
	fn sign_symmetric(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;

	/// Verify a symmetric signature previously produced by [`Self::sign_symmetric`].
	fn verify_symmetric(&self, key: &[u8], data: &[u8], signature: &[u8]) -> Result;

	/// Encrypt `data` in place using `key` and `iv`. `data.len()` must already be a multiple
	/// of [`Self::symmetric_block_size`].
	fn encrypt_symmetric(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result;

	/// Decrypt `data` in place using `key` and `iv`.
	fn decrypt_symmetric(&self, key: &[u8], iv: &[u8], data: &mut [u8]) -> Result;

	/// Length in bytes of an asymmetric signature produced with the given private key.
	fn asymmetric_signature_size(&self, key: &RsaPrivateKey) -> usize;

	/// Largest plaintext block the asymmetric cipher can encrypt in one call for a key of
	/// this size, accounting for padding overhead.
	fn asymmetric_plaintext_block_size(&self, key_size_bytes: usize) -> usize;

	/// Size in bytes of the ciphertext produced for one asymmetric plaintext block (equal to
	/// the RSA modulus size).
	fn asymmetric_ciphertext_block_size(&self, key_size_bytes: usize) -> usize;

	/// Encrypt `data` with the peer's public key (RSA-OAEP).
	fn encrypt_asymmetric(&self, key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>>;

	/// Decrypt `data` with the local private key.
	fn decrypt_asymmetric(&self, key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>>;

	/// Sign `data` with the local private key (RSA-PKCS#1v1.5).
	fn sign_asymmetric(&self, key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>>;

	/// Verify an asymmetric signature with the peer's public key.
	fn verify_asymmetric(&self, key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result;
}
