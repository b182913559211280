//! Cross-module end-to-end scenarios: chunk engine, connection FSM and crypto policy wired
//! together against an in-memory byte pipe rather than a real socket. Each test plays out one
//! of the handshake/renewal/failure scenarios the secure-channel layer has to get right.

use std::sync::Arc;
use std::time::Duration;

use rand::thread_rng;
use rsa::RsaPrivateKey;

use sc_core::body::{OpenRequest, OpenResponse};
use sc_core::chunk::encode::{self, SymmetricSenderKeys};
use sc_core::chunk::header::MessageHeader;
use sc_core::config::{CoreConfig, LocalIdentity};
use sc_core::connection::{ConnState, Role, SecureConnection};
use sc_core::token::SecurityToken;
use sc_core::wire::{Final, MessageType, SecurityMode, INITIAL_SEQUENCE_NUMBER};
use sc_crypto::pki::TrustAll;
use sc_crypto::policy::{Basic256Sha256, NoSecurity};
use sc_utils::status::StatusCode;

fn identity() -> LocalIdentity {
	let mut rng = thread_rng();
	LocalIdentity::from_rsa_key(RsaPrivateKey::new(&mut rng, 2048).unwrap()).unwrap()
}

/// Build a server-role connection without a real owning listener — `listener_id` is only
/// ever used by `Core` to broadcast teardown, which these in-memory scenarios never exercise.
fn server_connection(config: &CoreConfig, policy: Arc<dyn sc_crypto::SecurityPolicy>, mode: SecurityMode) -> SecureConnection {
	let mut conn = SecureConnection::new_client(config, String::new(), policy, mode);
	conn.role = Role::Server;
	conn
}

/// Scenario 1: full client/server handshake with `SecurityPolicy#None` reaches
/// `SC_CONNECTED` on both sides with `sendBufferSize` negotiated down to the configured
/// floor, and a MSG sent afterward round-trips in both directions.
#[test]
fn handshake_none_reaches_connected_and_round_trips_a_message() {
	let config = CoreConfig::default();
	let identity = identity();
	let pki = TrustAll;

	let mut client = SecureConnection::new_client(&config, "opc.tcp://localhost:4840".into(), Arc::new(NoSecurity), SecurityMode::None);
	let mut server = server_connection(&config, Arc::new(NoSecurity), SecurityMode::None);

	let hello = client.build_hello().unwrap();
	let ack = server.accept_hello(&hello, &config).unwrap();
	client.accept_ack(&ack, &config).unwrap();

	assert_eq!(client.negotiated.send_buffer_size, 8192);
	assert_eq!(server.negotiated.send_buffer_size, 8192);

	let opn_bytes = client.begin_open(Duration::from_secs(60), &identity).unwrap();
	let opened = server.feed(&opn_bytes, &identity, &pki).unwrap();
	assert_eq!(opened.len(), 1);
	let request = OpenRequest::decode(&opened[0].body).unwrap();

	let response = server.accept_open_issue(&request, &config, &identity, |_, _| true).unwrap();
	assert_eq!(server.state, ConnState::ScConnected);

	let response_bytes = server.encode_open_response(&response, opened[0].request_id, &identity).unwrap();
	let client_opened = client.feed(&response_bytes, &identity, &pki).unwrap();
	assert_eq!(client_opened.len(), 1);
	let response = OpenResponse::decode(&client_opened[0].body).unwrap();
	client.accept_open_issue_response(&response).unwrap();
	assert_eq!(client.state, ConnState::ScConnected);
	assert_eq!(client.secure_channel_id, server.secure_channel_id);

	let request_id = client.next_request_id();
	let msg_chunks = client.encode_symmetric(MessageType::Msg, b"hello server".to_vec(), request_id).unwrap();
	let mut from_client = Vec::new();
	for chunk in &msg_chunks {
		from_client.extend(server.feed(chunk, &identity, &pki).unwrap());
	}
	assert_eq!(from_client.len(), 1);
	assert_eq!(from_client[0].body, b"hello server");

	let reply_chunks = server.encode_symmetric(MessageType::Msg, b"hello client".to_vec(), from_client[0].request_id).unwrap();
	let mut from_server = Vec::new();
	for chunk in &reply_chunks {
		from_server.extend(client.feed(chunk, &identity, &pki).unwrap());
	}
	assert_eq!(from_server.len(), 1);
	assert_eq!(from_server[0].body, b"hello client");
}

/// Scenario 3: token renewal. A MSG that was already in flight under the previous token
/// still decrypts via `precedentKeys` once the server has rotated to a new one, and
/// `serverNewTokenActive` only flips the first time a chunk actually verifies under the
/// current token.
#[test]
fn token_renew_precedent_key_window_and_server_new_token_flip() {
	let config = CoreConfig::default();
	let client_identity = identity();
	let server_identity = identity();
	let policy: Arc<dyn sc_crypto::SecurityPolicy> = Arc::new(Basic256Sha256);
	let mode = SecurityMode::SignAndEncrypt;
	let pki = TrustAll;

	let mut client = SecureConnection::new_client(&config, "opc.tcp://localhost:4840".into(), policy.clone(), mode);
	let mut server = server_connection(&config, policy, mode);

	// The client already knows the server's certificate from discovery (out of scope here).
	client.peer_public_key = Some(server_identity.private_key.to_public_key());

	let hello = client.build_hello().unwrap();
	let ack = server.accept_hello(&hello, &config).unwrap();
	client.accept_ack(&ack, &config).unwrap();

	let opn_bytes = client.begin_open(Duration::from_millis(10_000), &client_identity).unwrap();
	let opened = server.feed(&opn_bytes, &server_identity, &pki).unwrap();
	let request = OpenRequest::decode(&opened[0].body).unwrap();

	let response = server.accept_open_issue(&request, &config, &server_identity, |_, _| true).unwrap();
	let response_bytes = server.encode_open_response(&response, opened[0].request_id, &server_identity).unwrap();

	let client_opened = client.feed(&response_bytes, &client_identity, &pki).unwrap();
	let response = OpenResponse::decode(&client_opened[0].body).unwrap();
	client.accept_open_issue_response(&response).unwrap();

	let old_token_id = client.current_token.unwrap().token_id;

	// Renew timer fires at 0.75 * revisedLifetime; build the OPN(Renew) under the
	// still-active (soon to be precedent) token and hand it to the server.
	let renew_chunks = client.begin_renew(Duration::from_millis(10_000)).unwrap();
	let mut server_saw_renew = Vec::new();
	for chunk in &renew_chunks {
		server_saw_renew.extend(server.feed(chunk, &server_identity, &pki).unwrap());
	}
	assert_eq!(server_saw_renew.len(), 1);
	let renew_request = OpenRequest::decode(&server_saw_renew[0].body).unwrap();

	let renew_response_chunks = server.accept_open_renew(&renew_request, &config, server_saw_renew[0].request_id, |_, _| true).unwrap();
	assert_ne!(server.current_token.unwrap().token_id, old_token_id);
	assert!(server.precedent_token.is_some());
	assert!(!server.server_new_token_active, "rotating to a new token doesn't itself flip the flag");

	let mut client_saw_renew = Vec::new();
	for chunk in &renew_response_chunks {
		client_saw_renew.extend(client.feed(chunk, &client_identity, &pki).unwrap());
	}
	let renew_response = OpenResponse::decode(&client_saw_renew[0].body).unwrap();
	client.accept_renew_response(&renew_response).unwrap();
	assert_ne!(client.current_token.unwrap().token_id, old_token_id);

	// Simulate a MSG the client queued just before processing the renewal response: still
	// protected with the token that is now the server's precedent one.
	let new_token = client.current_token.take();
	let new_keys = client.current_keys.take();
	client.current_token = client.precedent_token;
	client.current_keys = client.precedent_keys.take();

	let request_id = client.next_request_id();
	let late_chunks = client.encode_symmetric(MessageType::Msg, b"in flight before renew".to_vec(), request_id).unwrap();

	client.current_token = new_token;
	client.current_keys = new_keys;

	let mut late_decoded = Vec::new();
	for chunk in &late_chunks {
		late_decoded.extend(server.feed(chunk, &server_identity, &pki).unwrap());
	}
	assert_eq!(late_decoded.len(), 1);
	assert_eq!(late_decoded[0].body, b"in flight before renew");
	assert!(!server.server_new_token_active, "a precedent-token message must not flip the flag");

	// A MSG genuinely protected with the new token flips it.
	let request_id = client.next_request_id();
	let fresh_chunks = client.encode_symmetric(MessageType::Msg, b"after renew".to_vec(), request_id).unwrap();
	let mut fresh_decoded = Vec::new();
	for chunk in &fresh_chunks {
		fresh_decoded.extend(server.feed(chunk, &server_identity, &pki).unwrap());
	}
	assert_eq!(fresh_decoded.len(), 1);
	assert!(server.server_new_token_active);
}

/// Scenario 2: a full `Basic256Sha256`/`SignAndEncrypt` handshake derives correctly sized
/// key material on both sides, and a MSG body too large for one chunk is fragmented into
/// several `Intermediate` chunks followed by one `Final` chunk, reassembling byte-identical
/// on the far side.
#[test]
fn handshake_sign_and_encrypt_fragments_and_reassembles_an_oversize_body() {
	let config = CoreConfig::default();
	let client_identity = identity();
	let server_identity = identity();
	let policy: Arc<dyn sc_crypto::SecurityPolicy> = Arc::new(Basic256Sha256);
	let mode = SecurityMode::SignAndEncrypt;
	let pki = TrustAll;

	let mut client = SecureConnection::new_client(&config, "opc.tcp://localhost:4840".into(), policy.clone(), mode);
	let mut server = server_connection(&config, policy, mode);
	server.negotiated.max_chunk_count = 5;
	client.peer_public_key = Some(server_identity.private_key.to_public_key());

	let hello = client.build_hello().unwrap();
	let ack = server.accept_hello(&hello, &config).unwrap();
	client.accept_ack(&ack, &config).unwrap();

	let opn_bytes = client.begin_open(Duration::from_secs(60), &client_identity).unwrap();
	let opened = server.feed(&opn_bytes, &server_identity, &pki).unwrap();
	let request = OpenRequest::decode(&opened[0].body).unwrap();

	let response = server.accept_open_issue(&request, &config, &server_identity, |_, _| true).unwrap();
	let response_bytes = server.encode_open_response(&response, opened[0].request_id, &server_identity).unwrap();

	let client_opened = client.feed(&response_bytes, &client_identity, &pki).unwrap();
	let response = OpenResponse::decode(&client_opened[0].body).unwrap();
	client.accept_open_issue_response(&response).unwrap();

	// Both sides derived a 32-byte (AES-256) signing key and encryption key per the policy.
	let client_keys = client.current_keys.as_ref().unwrap();
	let server_keys = server.current_keys.as_ref().unwrap();
	assert_eq!(client_keys.sender.signing_key.len(), 32);
	assert_eq!(client_keys.sender.encryption_key.len(), 32);
	assert_eq!(server_keys.receiver.signing_key.len(), 32);
	assert_eq!(server_keys.receiver.encryption_key.len(), 32);

	client.negotiated.send_buffer_size = 1024;
	client.negotiated.max_chunk_count = 20;

	let big_body = vec![0x5Au8; 3_000];
	let request_id = client.next_request_id();
	let chunks = client.encode_symmetric(MessageType::Msg, big_body.clone(), request_id).unwrap();
	assert!(chunks.len() >= 2, "a 3000-byte body over a 1024-byte send buffer must span multiple chunks");

	for chunk in &chunks[..chunks.len() - 1] {
		let header = MessageHeader::read(chunk).unwrap();
		assert_eq!(header.is_final, Final::Intermediate);
	}
	let last_header = MessageHeader::read(chunks.last().unwrap()).unwrap();
	assert_eq!(last_header.is_final, Final::Final);

	let mut decoded = Vec::new();
	for chunk in &chunks {
		decoded.extend(server.feed(chunk, &server_identity, &pki).unwrap());
	}

	assert_eq!(decoded.len(), 1);
	assert_eq!(decoded[0].body, big_body);
}

/// Scenario 4: replaying a MSG with a sequence number equal to one already accepted is
/// rejected as a security check failure.
#[test]
fn replay_with_reused_sequence_number_is_rejected() {
	let config = CoreConfig::default();
	let mut server = server_connection(&config, Arc::new(NoSecurity), SecurityMode::None);
	server.secure_channel_id = 7;
	server.current_token = Some(SecurityToken::new(7, 1, std::time::SystemTime::now(), Duration::from_secs(60)));

	let identity = identity();
	let pki = TrustAll;

	let keys = SymmetricSenderKeys { signing_key: &[], encryption_key: &[], iv: &[] };
	let mut seq = INITIAL_SEQUENCE_NUMBER;
	let chunk = encode::encode_symmetric(MessageType::Msg, 7, 1, 9, b"first delivery", 8192, 0, false, server.policy.as_ref(), keys, &mut seq)
		.unwrap()
		.remove(0);

	let decoded = server.feed(&chunk, &identity, &pki).unwrap();
	assert_eq!(decoded.len(), 1);

	// The exact same chunk — same sequence number — arrives again.
	let err = server.feed(&chunk, &identity, &pki).unwrap_err();
	assert_eq!(err, StatusCode::BadSecurityChecksFailed);
}

/// Scenario 5: a chunk declaring `messageSize = receiveBufferSize + 1` is rejected before
/// the connection even waits for the rest of the (oversize) body to arrive.
#[test]
fn oversize_chunk_declaration_is_rejected_before_reading_the_body() {
	let config = CoreConfig::default();
	let mut client = SecureConnection::new_client(&config, "opc.tcp://localhost:4840".into(), Arc::new(NoSecurity), SecurityMode::None);
	let mut server = server_connection(&config, Arc::new(NoSecurity), SecurityMode::None);

	let hello = client.build_hello().unwrap();
	let ack = server.accept_hello(&hello, &config).unwrap();
	client.accept_ack(&ack, &config).unwrap();

	let oversize = server.negotiated.receive_buffer_size + 1;
	let mut chunk = Vec::new();
	MessageHeader { msg_type: MessageType::Msg, is_final: Final::Final, message_size: oversize, secure_channel_id: server.secure_channel_id }.write(&mut chunk);

	let identity = identity();
	let pki = TrustAll;
	let err = server.feed(&chunk, &identity, &pki).unwrap_err();
	assert_eq!(err, StatusCode::BadTcpMessageTooLarge);
}
