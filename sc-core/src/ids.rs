//! Small integer handles for connections and listeners.
//!
//! Listeners reference connections and connections reference their owning listener; rather
//! than store direct references either way (which would be a reference cycle with no clear
//! owner), both sides store the other's id and resolve it through [`crate::Core`]'s slab at
//! use time.

use core::num::NonZeroU32;

/// A `connId`: 0 is reserved for "none", so the wrapped value is always the
/// backing [`slab::Slab`] key plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(NonZeroU32);

impl ConnId {
	pub(crate) fn from_slab_key(key: usize) -> Self {
		Self(NonZeroU32::new(key as u32 + 1).expect("slab key + 1 is never zero"))
	}

	pub(crate) fn slab_key(self) -> usize {
		(self.0.get() - 1) as usize
	}

	/// The value carried in wire fields and `requestHandle`s that echo a connection id.
	pub fn as_u32(self) -> u32 {
		self.0.get()
	}
}

impl core::fmt::Display for ConnId {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "conn#{}", self.0.get())
	}
}

/// A `listenerId`, same shape and reservation convention as [`ConnId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(NonZeroU32);

impl ListenerId {
	pub(crate) fn from_slab_key(key: usize) -> Self {
		Self(NonZeroU32::new(key as u32 + 1).expect("slab key + 1 is never zero"))
	}

	pub(crate) fn slab_key(self) -> usize {
		(self.0.get() - 1) as usize
	}
}

impl core::fmt::Display for ListenerId {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "listener#{}", self.0.get())
	}
}
