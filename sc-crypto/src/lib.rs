//! Cryptographic building blocks for the secure-channel layer.
//!
//! Nothing in here talks to a socket or knows about chunk framing; the chunk engine calls
//! into a [`SecurityPolicy`] to turn plaintext chunk bodies into signed/encrypted bytes and
//! back. A second, independent concern lives in [`pki`]: certificate trust and thumbprinting.

/// Symmetric key material derived from a handshake nonce pair.
pub mod keys;
/// Certificate trust and thumbprinting, independent of the signing/encryption policy.
pub mod pki;
/// Concrete `SecurityPolicy` implementations: `None` and `Basic256Sha256`.
pub mod policy;
/// The `SecurityPolicy` trait.
pub mod provider;

use std::sync::Arc;

pub use keys::DerivedKeys;
pub use provider::SecurityPolicy;

/// Resolve a policy URI (as carried in an OPN asymmetric security header, or configured on an
/// endpoint/client connect request) to the concrete implementation that backs it. `None` means
/// the URI isn't one this crate implements — the caller reports `BadSecurityPolicyRejected` or
/// equivalent.
pub fn policy_for_uri(uri: &str) -> Option<Arc<dyn SecurityPolicy>> {
	Some(match uri {
		"http://opcfoundation.org/UA/SecurityPolicy#None" => Arc::new(policy::NoSecurity),
		"http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256" => Arc::new(policy::Basic256Sha256),
		_ => return None,
	})
}
