use rsa::{RsaPrivateKey, RsaPublicKey};
use sc_utils::error::Result;
use sc_utils::secret::Secret;

use crate::keys::DerivedKeys;
use crate::provider::SecurityPolicy;

/// The `http://opcfoundation.org/UA/SecurityPolicy#None` policy: no signing, no encryption.
/// Chunks still carry the full header structure, just with zero-length signature and
/// ciphertext-equals-plaintext.
pub struct NoSecurity;

impl SecurityPolicy for NoSecurity {
	fn uri(&self) -> &'static str { "http://opcfoundation.org/UA/SecurityPolicy#None" }

	fn symmetric_signature_size(&self) -> usize { 0 }

	fn symmetric_key_size(&self) -> usize { 0 }

	fn symmetric_block_size(&self) -> usize { 1 }

	fn derive_keys(&self, _secret: &[u8], _seed: &[u8]) -> Result<DerivedKeys> {
		Ok(DerivedKeys { signing_key: Secret::zeroed(0), encryption_key: Secret::zeroed(0), iv: Secret::zeroed(0) })
	}

	fn sign_symmetric(&self, _key: &[u8], _data: &[u8]) -> Result<Vec<u8>> { Ok(Vec::new()) }

	fn verify_symmetric(&self, _key: &[u8], _data: &[u8], _signature: &[u8]) -> Result { Ok(()) }

	fn encrypt_symmetric(&self, _key: &[u8], _iv: &[u8], _data: &mut [u8]) -> Result { Ok(()) }

	fn decrypt_symmetric(&self, _key: &[u8], _iv: &[u8], _data: &mut [u8]) -> Result { Ok(()) }

	fn asymmetric_signature_size(&self, _key: &RsaPrivateKey) -> usize { 0 }

	fn asymmetric_plaintext_block_size(&self, _key_size_bytes: usize) -> usize { usize::MAX }

	fn asymmetric_ciphertext_block_size(&self, _key_size_bytes: usize) -> usize { 0 }

	fn encrypt_asymmetric(&self, _key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> { Ok(data.to_vec()) }

	fn decrypt_asymmetric(&self, _key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> { Ok(data.to_vec()) }

	fn sign_asymmetric(&self, _key: &RsaPrivateKey, _data: &[u8]) -> Result<Vec<u8>> { Ok(Vec::new()) }

	fn verify_asymmetric(&self, _key: &RsaPublicKey, _data: &[u8], _signature: &[u8]) -> Result { Ok(()) }
}
