use zeroize::Zeroize;

/// A heap buffer holding key material, a nonce or another secret that must never
/// outlive its owner. The contents are overwritten with zeroes on drop so that a
/// closed connection does not leave key bytes lying around in freed memory.
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	pub fn zeroed(len: usize) -> Self {
		Self(vec![0u8; len])
	}

	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	pub fn as_mut_slice(&mut self) -> &mut [u8] {
		&mut self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl Drop for Secret {
	fn drop(&mut self) {
		self.0.zeroize();
	}
}

impl From<Vec<u8>> for Secret {
	fn from(bytes: Vec<u8>) -> Self {
		Self::new(bytes)
	}
}

impl core::fmt::Debug for Secret {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.write_str("Secret(..)")
	}
}
