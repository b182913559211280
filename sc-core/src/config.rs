//! Process-wide configuration knobs, constructed once by the embedding
//! application and passed into [`crate::Core::init`]. There is no XML/file loader — the
//! embedder wires these in at construction time rather than this crate reading them from
//! disk itself.

use std::time::Duration;

use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::RsaPrivateKey;
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;

use crate::wire::MIN_BUFFER_SIZE;

#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
	/// `SOPC_MAX_SECURE_CONNECTIONS`: capacity of the secure-connection slot table.
	pub max_secure_connections: usize,
	/// `SOPC_MAX_SOCKETS_CONNECTIONS`: capacity of a single listener's connection set.
	pub max_socket_connections: usize,
	/// `SOPC_MAX_MESSAGE_LENGTH`: ceiling applied to both receive and send message sizes
	/// unless the connection negotiates something smaller.
	pub max_message_length: u32,
	/// `SOPC_TCP_UA_MIN_BUFFER_SIZE`: floor every negotiated buffer size must clear.
	pub min_buffer_size: u32,
	/// `SOPC_SC_CONNECTION_TIMEOUT_MS`: deadline for a connection to reach `SC_CONNECTED`.
	pub connection_timeout: Duration,
	/// `SOPC_MINIMUM_SECURE_CONNECTION_LIFETIME`: floor applied to a client's requested
	/// token lifetime.
	pub min_connection_lifetime: Duration,
}

impl Default for CoreConfig {
	fn default() -> Self {
		Self {
			max_secure_connections: 100,
			max_socket_connections: 100,
			max_message_length: 2 * 1024 * 1024,
			min_buffer_size: MIN_BUFFER_SIZE,
			connection_timeout: Duration::from_secs(10),
			min_connection_lifetime: Duration::from_secs(10),
		}
	}
}

/// This process's application instance certificate and the private key backing it, used on
/// every asymmetric (OPN) chunk this side either sends or receives. A `None` policy channel
/// never touches either field.
pub struct LocalIdentity {
	pub certificate_der: Vec<u8>,
	pub private_key: RsaPrivateKey,
}

impl LocalIdentity {
	/// Build an identity from a bare RSA key pair, standing in for a real application
	/// instance certificate with the PKCS#1 DER of its public key (the same representation
	/// [`sc_crypto::pki::peer_public_key`](../../sc_crypto/pki/fn.peer_public_key.html) parses
	/// back out of a peer's "certificate" bytes on the wire).
	pub fn from_rsa_key(private_key: RsaPrivateKey) -> Result<Self> {
		let certificate_der = private_key
			.to_public_key()
			.to_pkcs1_der()
			.map_err(|err| fail!(StatusCode::BadCertificateInvalid, "Could not encode RSA public key as a certificate stand-in: {err}"))?
			.as_bytes()
			.to_vec();

		Ok(Self { certificate_der, private_key })
	}
}
