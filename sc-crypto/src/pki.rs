use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::RsaPublicKey;
use sha1::{Digest, Sha1};

use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;

/// A certificate's SHA-1 thumbprint, as carried in the asymmetric security header to name
/// the sender/receiver certificate out of band from the bytes actually exchanged.
pub type Thumbprint = [u8; 20];

/// Compute the thumbprint of a DER-encoded certificate.
pub fn thumbprint(cert_der: &[u8]) -> Thumbprint {
	let digest = Sha1::digest(cert_der);
	digest.into()
}

/// Recover the RSA public key carried by a peer's "certificate" bytes.
///
/// Full X.509 chain parsing is out of scope here (trust itself is [`Pki`]'s job); what this
/// crate actually needs out of the sender/receiver certificate exchanged during OPN is the
/// RSA public key underneath it, so `cert_der` is treated as a PKCS#1 `RSAPublicKey` DER
/// blob directly rather than unwrapped from a surrounding X.509 structure.
pub fn peer_public_key(cert_der: &[u8]) -> Result<RsaPublicKey> {
	RsaPublicKey::from_pkcs1_der(cert_der).map_err(|err| fail!(StatusCode::BadCertificateInvalid, "Certificate does not carry a usable RSA public key: {err}"))
}

/// Decides whether a peer's certificate should be accepted.
///
/// Parsing and validating an X.509 chain is outside what this crate takes on; a host
/// application supplies an implementation backed by whatever PKI store it already has (a
/// trust list on disk, an enterprise CA, a hardcoded pinned certificate for testing). The
/// secure connection FSM calls [`Pki::is_trusted`] once per incoming OpenSecureChannel and
/// treats a rejection as `BadCertificateUntrusted`.
pub trait Pki: Send + Sync {
	/// Whether `cert_der` should be accepted as the peer's application instance certificate.
	fn is_trusted(&self, cert_der: &[u8]) -> bool;
}

/// A [`Pki`] that accepts every certificate. Useful for local testing and for the `None`
/// security policy, where no certificate is ever exchanged.
pub struct TrustAll;

impl Pki for TrustAll {
	fn is_trusted(&self, _cert_der: &[u8]) -> bool { true }
}

/// A [`Pki`] backed by a fixed set of trusted thumbprints, computed once at construction.
pub struct TrustList {
	thumbprints: Vec<Thumbprint>,
}

impl TrustList {
	pub fn new(certs: impl IntoIterator<Item = Vec<u8>>) -> Self { Self { thumbprints: certs.into_iter().map(|cert| thumbprint(&cert)).collect() } }
}

impl Pki for TrustList {
	fn is_trusted(&self, cert_der: &[u8]) -> bool { self.thumbprints.contains(&thumbprint(cert_der)) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn thumbprint_is_stable() {
		let cert = b"not a real certificate, just some bytes".to_vec();
		assert_eq!(thumbprint(&cert), thumbprint(&cert));
	}

	#[test]
	fn trust_list_rejects_unknown_certs() {
		let known = b"known certificate".to_vec();
		let unknown = b"unknown certificate".to_vec();

		let trust = TrustList::new([known.clone()]);

		assert!(trust.is_trusted(&known));
		assert!(!trust.is_trusted(&unknown));
	}
}
