//! Security tokens and the symmetric key material derived from a handshake nonce pair.

use std::time::{Duration, SystemTime};

use sc_crypto::{DerivedKeys, SecurityPolicy};
use sc_utils::error::Result;

use crate::connection::Role;

/// `{secureChannelId, tokenId}` plus the lifetime the server granted it.
#[derive(Debug, Clone, Copy)]
pub struct SecurityToken {
	pub channel_id: u32,
	pub token_id: u32,
	pub created_at: SystemTime,
	pub revised_lifetime: Duration,
	pub lifetime_end: SystemTime,
}

impl SecurityToken {
	pub fn new(channel_id: u32, token_id: u32, created_at: SystemTime, revised_lifetime: Duration) -> Self {
		Self { channel_id, token_id, created_at, revised_lifetime, lifetime_end: created_at + revised_lifetime }
	}

	pub fn is_expired(&self, now: SystemTime) -> bool {
		now >= self.lifetime_end
	}
}

/// The sender/receiver key pair active for one token, keyed by direction rather than by
/// client/server so the connection FSM never has to branch on role when signing or
/// decrypting.
pub struct KeySet {
	pub sender: DerivedKeys,
	pub receiver: DerivedKeys,
}

/// Derive the sender/receiver key set for one side of a channel from the client/server nonce
/// pair, per OPC UA Part 6 §6.7.5:
///
/// `ClientKeys = P_SHA256(secret = ServerNonce, seed = ClientNonce)`
/// `ServerKeys = P_SHA256(secret = ClientNonce, seed = ServerNonce)`
///
/// The client signs/encrypts outgoing messages with `ClientKeys` and verifies/decrypts
/// incoming ones with `ServerKeys`; the server does the opposite.
pub fn derive_key_set(policy: &dyn SecurityPolicy, client_nonce: &[u8], server_nonce: &[u8], role: Role) -> Result<KeySet> {
	let client_keys = policy.derive_keys(server_nonce, client_nonce)?;
	let server_keys = policy.derive_keys(client_nonce, server_nonce)?;

	Ok(match role {
		Role::Client => KeySet { sender: client_keys, receiver: server_keys },
		Role::Server => KeySet { sender: server_keys, receiver: client_keys },
	})
}

#[cfg(test)]
mod tests {
	use sc_crypto::policy::Basic256Sha256;

	use super::*;

	#[test]
	fn client_and_server_key_sets_cross_match() {
		let policy = Basic256Sha256;
		let client_nonce = b"client nonce bytes xxxxxxxxxxxx";
		let server_nonce = b"server nonce bytes xxxxxxxxxxxx";

		let client = derive_key_set(&policy, client_nonce, server_nonce, Role::Client).unwrap();
		let server = derive_key_set(&policy, client_nonce, server_nonce, Role::Server).unwrap();

		// What the client signs with, the server must verify with, and vice versa.
		assert_eq!(client.sender.signing_key.as_slice(), server.receiver.signing_key.as_slice());
		assert_eq!(client.receiver.signing_key.as_slice(), server.sender.signing_key.as_slice());
	}

	#[test]
	fn token_expiry_is_based_on_revised_lifetime() {
		let created = SystemTime::UNIX_EPOCH;
		let token = SecurityToken::new(1, 1, created, Duration::from_secs(10));

		assert!(!token.is_expired(created + Duration::from_secs(5)));
		assert!(token.is_expired(created + Duration::from_secs(11)));
	}
}
