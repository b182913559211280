//! The secure-connection FSM: one instance per TCP socket,
//! owned by [`crate::Core`]'s connection slab and addressed by [`crate::ids::ConnId`].
//!
//! This module owns the state *transitions* and the framing/crypto plumbing that makes them
//! possible; it never touches a socket or a `stakker` timer directly; [`crate::Core`] drives
//! both from the outside (arming timers via `cx.access_actor().clone()` + `cx.after`, writing
//! via `sc_runtime::Io`).

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::Rng;
use rsa::RsaPublicKey;
use sc_crypto::pki::Pki;
use sc_crypto::SecurityPolicy;
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;
use stakker::FixedTimerKey;

use crate::body::{AcknowledgeBody, CloseRequest, ErrorBody, HelloBody, OpenRequest, OpenResponse, TcpConnectionProperties};
use crate::chunk::header::{MessageHeader, SequenceHeader};
use crate::chunk::{decode, encode, ChunkAssembly, DecodedMessage};
use crate::config::{CoreConfig, LocalIdentity};
use crate::ids::ListenerId;
use crate::request::PendingRequestTable;
use crate::token::{derive_key_set, KeySet, SecurityToken};
use crate::wire::{Final, MessageType, RequestType, SecurityMode, SECURE_MESSAGE_HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Client,
	Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
	TcpInit,
	TcpNegotiate,
	ScInit,
	ScConnecting,
	ScConnected,
	ScConnectedRenew,
	ScClosed,
}

/// Transient peer-certificate bookkeeping that only exists while the channel is
/// asymmetrically secured.
#[derive(Debug, Clone, Default)]
pub struct AsymmetricInfo {
	pub policy_uri: String,
	pub peer_certificate: Vec<u8>,
	pub peer_thumbprint: Vec<u8>,
}

/// One frame's worth of bytes this connection needs written to its socket, in order.
pub type Outbox = Vec<Vec<u8>>;

pub struct SecureConnection {
	pub role: Role,
	pub state: ConnState,
	pub listener_id: Option<ListenerId>,

	pub endpoint_url: String,
	pub secure_channel_id: u32,

	/// This side's own advertised buffer/message/chunk limits, fixed at construction.
	pub local_props: TcpConnectionProperties,
	/// The *negotiated* limits in force after HEL/ACK.
	pub negotiated: TcpConnectionProperties,

	pub policy: Arc<dyn SecurityPolicy>,
	pub mode: SecurityMode,
	pub asymmetric: AsymmetricInfo,
	pub peer_public_key: Option<RsaPublicKey>,

	pub client_nonce: Vec<u8>,

	pub current_token: Option<SecurityToken>,
	pub current_keys: Option<KeySet>,
	pub precedent_token: Option<SecurityToken>,
	pub precedent_keys: Option<KeySet>,
	/// Server-only: flips true the instant a message arrives protected with `current_token`,
	/// at which point `precedent_*` becomes eligible for disposal.
	pub server_new_token_active: bool,

	pub seq_sent: u32,
	pub seq_recv: Option<u32>,
	/// Client-only: the next `requestId` to stamp on an outgoing request.
	pub next_request_id: u32,
	pub pending_requests: PendingRequestTable,

	pub chunk_assembly: ChunkAssembly,
	pub recv_buffer: Vec<u8>,

	pub connection_establish_timer: FixedTimerKey,
	pub token_renew_timer: FixedTimerKey,
}

impl SecureConnection {
	/// Construct a fresh client connection in `TCP_INIT`, about to dial `endpoint_url`.
	pub fn new_client(config: &CoreConfig, endpoint_url: String, policy: Arc<dyn SecurityPolicy>, mode: SecurityMode) -> Self {
		Self {
			role: Role::Client,
			state: ConnState::TcpInit,
			listener_id: None,
			endpoint_url,
			secure_channel_id: 0,
			local_props: default_props(config),
			negotiated: default_props(config),
			policy,
			mode,
			asymmetric: AsymmetricInfo::default(),
			peer_public_key: None,
			client_nonce: Vec::new(),
			current_token: None,
			current_keys: None,
			precedent_token: None,
			precedent_keys: None,
			server_new_token_active: false,
			seq_sent: crate::wire::INITIAL_SEQUENCE_NUMBER,
			seq_recv: None,
			next_request_id: 1,
			pending_requests: PendingRequestTable::default(),
			chunk_assembly: ChunkAssembly::default(),
			recv_buffer: Vec::new(),
			connection_establish_timer: FixedTimerKey::default(),
			token_renew_timer: FixedTimerKey::default(),
		}
	}

	/// Construct a fresh server connection in `TCP_INIT`, for a socket a [`crate::listener`]
	/// just accepted. `policy`/`mode` come from the owning endpoint's fixed configuration —
	/// known before any OPN chunk arrives, since decoding one requires already knowing which
	/// policy produced it.
	pub fn new_server(config: &CoreConfig, listener_id: ListenerId, policy: Arc<dyn SecurityPolicy>, mode: SecurityMode) -> Self {
		let mut conn = Self::new_client(config, String::new(), policy, mode);
		conn.role = Role::Server;
		conn.listener_id = Some(listener_id);
		conn
	}

	// ---- HEL/ACK -------------------------------------

	/// Client: build the outgoing HEL body on `SOCKET_CONNECTION` and move to `TCP_NEGOTIATE`.
	pub fn build_hello(&mut self) -> Result<HelloBody> {
		self.state = ConnState::TcpNegotiate;
		Ok(HelloBody { props: self.local_props, endpoint_url: self.endpoint_url.clone() })
	}

	/// Server: consume an incoming HEL, apply the min-rule against this side's own limits and
	/// produce the ACK body. Moves straight to `SC_INIT` — the server has nothing further to
	/// wait for at the TCP layer.
	pub fn accept_hello(&mut self, hello: &HelloBody, config: &CoreConfig) -> Result<AcknowledgeBody> {
		self.endpoint_url = hello.endpoint_url.clone();
		self.negotiated = negotiate(&self.local_props, &hello.props, config)?;
		self.state = ConnState::ScInit;
		Ok(AcknowledgeBody { props: self.negotiated })
	}

	/// Client: consume the server's ACK, apply the min-rule, move to `SC_INIT`.
	pub fn accept_ack(&mut self, ack: &AcknowledgeBody, config: &CoreConfig) -> Result {
		self.negotiated = negotiate(&self.local_props, &ack.props, config)?;
		self.state = ConnState::ScInit;
		Ok(())
	}

	// ---- OPN issue -------------------------------------

	/// Client: build the OpenSecureChannel(Issue) request and move to `SC_CONNECTING`.
	pub fn begin_open(&mut self, requested_lifetime: Duration, identity: &LocalIdentity) -> Result<Vec<u8>> {
		if self.mode != SecurityMode::None {
			self.client_nonce = fresh_nonce(self.policy.symmetric_key_size().max(32));
		}

		let request = OpenRequest {
			request_handle: 0,
			client_protocol_version: self.local_props.protocol_version,
			request_type: RequestType::Issue,
			security_mode: self.mode,
			client_nonce: self.client_nonce.clone(),
			requested_lifetime_ms: requested_lifetime.as_millis() as u32,
		};

		self.state = ConnState::ScConnecting;
		self.encode_open(request, identity)
	}

	/// Server: consume an OPN(Issue) request, mint a fresh token, derive keys and build the
	/// response. `propose_ids` receives `(channel_id, token_id)` candidates and returns
	/// whether they're free of collision across the owning listener's other connections.
	pub fn accept_open_issue(
		&mut self,
		request: &OpenRequest,
		config: &CoreConfig,
		identity: &LocalIdentity,
		mut propose_ids: impl FnMut(u32, u32) -> bool,
	) -> Result<OpenResponse> {
		if request.security_mode != self.mode {
			return Err(fail!(StatusCode::BadInvalidArgument, "OPN security mode does not match the endpoint's configured mode"));
		}

		let lifetime = requested_lifetime(request.requested_lifetime_ms, config);

		let mut server_nonce = Vec::new();
		if self.mode != SecurityMode::None {
			server_nonce = fresh_nonce(self.policy.symmetric_key_size().max(32));
		}

		let (channel_id, token_id) = mint_ids(&mut propose_ids)?;
		self.secure_channel_id = channel_id;

		let token = SecurityToken::new(channel_id, token_id, now(), lifetime);
		let keys = if self.mode == SecurityMode::None {
			None
		} else {
			Some(derive_key_set(self.policy.as_ref(), &request.client_nonce, &server_nonce, Role::Server)?)
		};

		self.current_token = Some(token);
		self.current_keys = keys;
		self.server_new_token_active = true;
		self.state = ConnState::ScConnected;

		Ok(OpenResponse {
			request_handle: request.request_handle,
			service_result: StatusCode::Good,
			server_protocol_version: self.local_props.protocol_version,
			channel_id,
			token_id,
			created_at_unix: unix_seconds(now()),
			revised_lifetime_ms: lifetime.as_millis() as u32,
			server_nonce,
		})
	}

	/// Client: consume the OPN(Issue) response, derive keys, store the token and move to
	/// `SC_CONNECTED`. Returns the renewal delay the caller should arm
	/// `token_renew_timer` for.
	pub fn accept_open_issue_response(&mut self, response: &OpenResponse) -> Result<Duration> {
		if !response.service_result.is_good() {
			return Err(response.service_result);
		}

		if response.channel_id == 0 || response.token_id == 0 {
			return Err(fail!(StatusCode::BadSecurityChecksFailed, "Server granted a zero channel id or token id"));
		}

		if self.mode == SecurityMode::None && !response.server_nonce.is_empty() {
			return Err(fail!(StatusCode::BadSecurityChecksFailed, "None-mode OPN response carried a non-empty server nonce"));
		}

		let lifetime = Duration::from_millis(response.revised_lifetime_ms as u64);
		self.secure_channel_id = response.channel_id;
		self.current_token = Some(SecurityToken::new(response.channel_id, response.token_id, now(), lifetime));

		self.current_keys = if self.mode == SecurityMode::None {
			None
		} else {
			Some(derive_key_set(self.policy.as_ref(), &self.client_nonce, &response.server_nonce, Role::Client)?)
		};

		self.state = ConnState::ScConnected;
		Ok(lifetime.mul_f32(0.75))
	}

	// ---- OPN renew --------------------------------------

	/// Client: the renewal timer fired; build an OPN(Renew) request on the still-active
	/// symmetric channel and move to `SC_CONNECTED_RENEW`.
	pub fn begin_renew(&mut self, requested_lifetime: Duration) -> Result<Outbox> {
		if self.mode != SecurityMode::None {
			self.client_nonce = fresh_nonce(self.policy.symmetric_key_size().max(32));
		}

		let request = OpenRequest {
			request_handle: 0,
			client_protocol_version: self.local_props.protocol_version,
			request_type: RequestType::Renew,
			security_mode: self.mode,
			client_nonce: self.client_nonce.clone(),
			requested_lifetime_ms: requested_lifetime.as_millis() as u32,
		};

		self.state = ConnState::ScConnectedRenew;
		let body = request.encode();
		let request_id = self.next_request_id();
		self.encode_symmetric(MessageType::Opn, body, request_id)
	}

	/// Server: consume an OPN(Renew) arriving on the symmetric channel (it is itself framed
	/// and decoded as an ordinary MSG-style chunk, protected by the current token).
	pub fn accept_open_renew(
		&mut self,
		request: &OpenRequest,
		config: &CoreConfig,
		request_id: u32,
		mut propose_ids: impl FnMut(u32, u32) -> bool,
	) -> Result<Outbox> {
		let current = self.current_token.ok_or_else(|| fail!(StatusCode::BadSecureChannelClosed, "Renew requested before any token was issued"))?;

		let lifetime = requested_lifetime(request.requested_lifetime_ms, config);

		let mut server_nonce = Vec::new();
		if self.mode != SecurityMode::None {
			server_nonce = fresh_nonce(self.policy.symmetric_key_size().max(32));
		}

		let token_id = mint_token_id(current.channel_id, &mut propose_ids)?;

		let token = SecurityToken::new(current.channel_id, token_id, now(), lifetime);
		let keys = if self.mode == SecurityMode::None {
			None
		} else {
			Some(derive_key_set(self.policy.as_ref(), &request.client_nonce, &server_nonce, Role::Server)?)
		};

		self.precedent_token = self.current_token.take();
		self.precedent_keys = self.current_keys.take();
		self.current_token = Some(token);
		self.current_keys = keys;
		self.server_new_token_active = false;

		let response = OpenResponse {
			request_handle: request.request_handle,
			service_result: StatusCode::Good,
			server_protocol_version: self.local_props.protocol_version,
			channel_id: current.channel_id,
			token_id,
			created_at_unix: unix_seconds(now()),
			revised_lifetime_ms: lifetime.as_millis() as u32,
			server_nonce,
		};

		self.encode_symmetric(MessageType::Opn, response.encode(), request_id)
	}

	/// Client: consume the renewal's OPN response — same channel id, a fresh token id — and
	/// move the current token to precedent before promoting the new one.
	pub fn accept_renew_response(&mut self, response: &OpenResponse) -> Result<Duration> {
		if !response.service_result.is_good() {
			return Err(response.service_result);
		}

		let current = self.current_token.ok_or_else(|| fail!(StatusCode::BadSecureChannelClosed, "Renew response with no active token"))?;

		if response.channel_id != current.channel_id {
			return Err(fail!(StatusCode::BadSecurityChecksFailed, "Renewed token changed channel id"));
		}
		if response.token_id == current.token_id {
			return Err(fail!(StatusCode::BadSecurityChecksFailed, "Renewed token reused the previous token id"));
		}

		let lifetime = Duration::from_millis(response.revised_lifetime_ms as u64);

		let new_keys = if self.mode == SecurityMode::None {
			None
		} else {
			Some(derive_key_set(self.policy.as_ref(), &self.client_nonce, &response.server_nonce, Role::Client)?)
		};

		self.precedent_token = self.current_token.take();
		self.precedent_keys = self.current_keys.take();
		self.current_token = Some(SecurityToken::new(response.channel_id, response.token_id, now(), lifetime));
		self.current_keys = new_keys;

		self.state = ConnState::ScConnected;
		Ok(lifetime.mul_f32(0.75))
	}

	// ---- Symmetric send/receive ----

	pub fn next_request_id(&mut self) -> u32 {
		let id = self.next_request_id;
		self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
		id
	}

	/// Encode a logical MSG/CLO/OPN(renew) body into one or more wire chunks using the
	/// currently active token and key set.
	pub fn encode_symmetric(&mut self, msg_type: MessageType, body: Vec<u8>, request_id: u32) -> Result<Outbox> {
		let token = self.current_token.ok_or_else(|| fail!(StatusCode::BadSecureChannelClosed, "No active token to protect outgoing chunk"))?;
		let encrypted = self.mode.is_encrypted();

		let zero = sc_utils::secret::Secret::zeroed(0);
		let (signing, encryption, iv) = match &self.current_keys {
			Some(keys) => (keys.sender.signing_key.as_slice(), keys.sender.encryption_key.as_slice(), keys.sender.iv.as_slice()),
			None => (zero.as_slice(), zero.as_slice(), zero.as_slice()),
		};

		let sender = encode::SymmetricSenderKeys { signing_key: signing, encryption_key: encryption, iv };

		encode::encode_symmetric(
			msg_type,
			self.secure_channel_id,
			token.token_id,
			request_id,
			&body,
			self.negotiated.send_buffer_size,
			self.negotiated.send_max_chunk_count,
			encrypted,
			self.policy.as_ref(),
			sender,
			&mut self.seq_sent,
		)
	}

	fn encode_open(&mut self, request: OpenRequest, identity: &LocalIdentity) -> Result<Vec<u8>> {
		let request_id = self.next_request_id();
		self.encode_open_envelope(&request.encode(), request_id, identity)
	}

	/// Server: encode an OPN(Issue) response over the same asymmetric envelope the request
	/// arrived on, echoing the request's `requestId` rather than minting a new one (OPC UA
	/// Part 6 requires the response's sequence header to carry the request's id back).
	pub fn encode_open_response(&mut self, response: &OpenResponse, request_id: u32, identity: &LocalIdentity) -> Result<Vec<u8>> {
		self.encode_open_envelope(&response.encode(), request_id, identity)
	}

	fn encode_open_envelope(&mut self, body: &[u8], request_id: u32, identity: &LocalIdentity) -> Result<Vec<u8>> {
		let signed = self.mode.is_signed();
		let encrypted = self.mode.is_encrypted();

		encode::encode_asymmetric(
			MessageType::Opn,
			self.secure_channel_id,
			request_id,
			body,
			self.negotiated.send_buffer_size,
			signed,
			encrypted,
			self.policy.as_ref(),
			self.policy.uri(),
			&identity.certificate_der,
			Some(&identity.private_key),
			self.peer_public_key.as_ref(),
			&self.asymmetric.peer_thumbprint,
			self.seq_sent,
		)
		.inspect(|_| self.seq_sent = self.seq_sent.wrapping_add(1))
	}

	/// Feed freshly received bytes into the per-connection reassembly buffer and drain as
	/// many complete logical messages as are now available.
	pub fn feed(&mut self, bytes: &[u8], identity: &LocalIdentity, pki: &dyn Pki) -> Result<Vec<DecodedMessage>> {
		self.recv_buffer.extend_from_slice(bytes);

		let mut out = Vec::new();
		loop {
			if self.recv_buffer.len() < SECURE_MESSAGE_HEADER_SIZE {
				return Ok(out);
			}

			let header = decode::read_message_header(&self.recv_buffer)?;
			if header.message_size as usize > self.negotiated.receive_buffer_size as usize {
				return Err(fail!(StatusCode::BadTcpMessageTooLarge, "Chunk declares {} bytes, over the {}-byte receive buffer", header.message_size, self.negotiated.receive_buffer_size));
			}

			if self.recv_buffer.len() < header.message_size as usize {
				return Ok(out);
			}

			let chunk: Vec<u8> = self.recv_buffer.drain(..header.message_size as usize).collect();

			if let Some(msg) = self.decode_one(&header, &chunk, identity, pki)? {
				out.push(msg);
			}
		}
	}

	fn decode_one(&mut self, header: &MessageHeader, chunk: &[u8], identity: &LocalIdentity, pki: &dyn Pki) -> Result<Option<DecodedMessage>> {
		if !header.msg_type.is_secured() {
			let request_id = 0;
			return self.finish_chunk(header.msg_type, header.is_final, chunk[SECURE_MESSAGE_HEADER_SIZE..].to_vec(), request_id);
		}

		// Renewal OPN travels over the symmetric channel, protected with the current token,
		// even though its message type is `Opn`: only a channel with no token
		// yet established (the initial issue) uses the asymmetric, certificate-based header.
		let opens_asymmetric = header.msg_type == MessageType::Opn && self.current_token.is_none();

		let (request_id, body) = if opens_asymmetric {
			let signed = self.mode.is_signed();
			let encrypted = self.mode.is_encrypted();

			let (sec, seq, body) =
				decode::decode_asymmetric(chunk, self.policy.as_ref(), signed, encrypted, Some(&identity.private_key), self.peer_public_key.as_ref())?;

			if sec.policy_uri != self.policy.uri() {
				return Err(fail!(StatusCode::BadSecurityChecksFailed, "OPN policy URI does not match the negotiated policy"));
			}
			if !pki.is_trusted(&sec.sender_certificate) {
				return Err(fail!(StatusCode::BadCertificateUntrusted, "Peer certificate rejected by PKI"));
			}

			self.asymmetric = AsymmetricInfo { policy_uri: sec.policy_uri, peer_certificate: sec.sender_certificate, peer_thumbprint: sec.receiver_thumbprint };
			decode::check_sequence_number(self.seq_recv, seq.sequence_number)?;
			self.seq_recv = Some(seq.sequence_number);

			if (self.mode.is_signed() || self.mode.is_encrypted()) && self.peer_public_key.is_none() {
				self.peer_public_key = Some(sc_crypto::pki::peer_public_key(&self.asymmetric.peer_certificate)?);
			}

			(seq.request_id, body)
		} else {
			let encrypted = self.mode.is_encrypted();
			let (seq, body) = self.decode_symmetric_with_fallback(chunk, encrypted)?;

			decode::check_sequence_number(self.seq_recv, seq.sequence_number)?;
			self.seq_recv = Some(seq.sequence_number);

			(seq.request_id, body)
		};

		self.finish_chunk(header.msg_type, header.is_final, body, request_id)
	}

	/// Dispatch on `isFinal`: `C` accumulates into the in-flight
	/// reassembly, `A` throws away whatever has accumulated so far with no message produced,
	/// and `F` completes assembly and hands the logical message upward. The connection FSM
	/// arms `receiveMaxChunkCount = 1`, so in practice every chunk this workspace
	/// actually decodes is `Final`, but the `C`/`A` arms still have to behave correctly rather
	/// than panic the moment a peer (or a test) sends something else.
	fn finish_chunk(&mut self, msg_type: MessageType, is_final: Final, body: Vec<u8>, request_id: u32) -> Result<Option<DecodedMessage>> {
		match is_final {
			Final::Intermediate => {
				self.chunk_assembly
					.push_intermediate(msg_type, &body, self.negotiated.send_max_chunk_count(), self.negotiated.receive_max_message_size())
					.map_err(|_| fail!(StatusCode::BadTcpMessageTooLarge, "Chunk assembly budget exceeded"))?;
				Ok(None)
			}
			Final::Abort => {
				self.chunk_assembly.reset();
				Ok(None)
			}
			Final::Final => {
				let whole = self
					.chunk_assembly
					.finish(msg_type, &body, self.negotiated.receive_max_message_size())
					.map_err(|_| fail!(StatusCode::BadTcpMessageTooLarge, "Chunk assembly budget exceeded"))?;
				Ok(Some(DecodedMessage { msg_type, request_id, body: whole }))
			}
		}
	}

	/// Decode a symmetric chunk against `currentKeys`, falling back to `precedentKeys` on
	/// failure — the window a renewal leaves open while the peer still has in-flight traffic
	/// protected with the token that just got superseded. Flips `server_new_token_active` the
	/// first time a chunk actually verifies under the current token.
	fn decode_symmetric_with_fallback(&mut self, chunk: &[u8], encrypted: bool) -> Result<(SequenceHeader, Vec<u8>)> {
		let zero = sc_utils::secret::Secret::zeroed(0);

		if self.current_token.is_some() {
			let (signing, encryption, iv) = match &self.current_keys {
				Some(keys) => (keys.receiver.signing_key.as_slice(), keys.receiver.encryption_key.as_slice(), keys.receiver.iv.as_slice()),
				None => (zero.as_slice(), zero.as_slice(), zero.as_slice()),
			};
			let receiver = decode::SymmetricReceiverKeys { signing_key: signing, encryption_key: encryption, iv };

			if let Ok((_, seq, body)) = decode::decode_symmetric(chunk, self.policy.as_ref(), encrypted, receiver) {
				if self.role == Role::Server && !self.server_new_token_active {
					self.server_new_token_active = true;
				}
				return Ok((seq, body));
			}
		}

		if self.precedent_token.is_some() {
			let (signing, encryption, iv) = match &self.precedent_keys {
				Some(keys) => (keys.receiver.signing_key.as_slice(), keys.receiver.encryption_key.as_slice(), keys.receiver.iv.as_slice()),
				None => (zero.as_slice(), zero.as_slice(), zero.as_slice()),
			};
			let receiver = decode::SymmetricReceiverKeys { signing_key: signing, encryption_key: encryption, iv };

			return decode::decode_symmetric(chunk, self.policy.as_ref(), encrypted, receiver).map(|(_, seq, body)| (seq, body));
		}

		Err(fail!(StatusCode::BadSecureChannelTokenUnknown, "No current or precedent token established to decrypt incoming chunk"))
	}

	// ---- Close ----------------------------------------

	/// Build the best-effort CLO (client) or ERR (server) that must reach the wire *before*
	/// the slot tears down — the caller is expected to post it via
	/// [`crate::event::EventQueue::enqueue_next`] ahead of the teardown event.
	///
	/// ERR, like HEL/ACK, is never secured — it has to get through even when no token was ever established, e.g. a
	/// malformed HEL during `TCP_NEGOTIATE`. CLO is the opposite: it travels on the symmetric
	/// channel, so a client that never reached a connected state has nothing valid to sign it
	/// with and sends nothing.
	pub fn close(&mut self, reason: StatusCode) -> Outbox {
		self.state = ConnState::ScClosed;

		match self.role {
			Role::Client => {
				if self.current_token.is_none() {
					return Vec::new();
				}

				let request_id = self.next_request_id();
				let body = CloseRequest { request_handle: 0 }.encode();
				self.encode_symmetric(MessageType::Clo, body, request_id).unwrap_or_default()
			}
			Role::Server => {
				let body = ErrorBody::for_failure(reason, &reason.to_string()).encode();
				vec![crate::chunk::encode_flat(MessageType::Err, &body)]
			}
		}
	}
}

fn default_props(config: &CoreConfig) -> TcpConnectionProperties {
	TcpConnectionProperties {
		protocol_version: 0,
		receive_buffer_size: config.min_buffer_size,
		send_buffer_size: config.min_buffer_size,
		max_message_size: config.max_message_length,
		max_chunk_count: 1,
	}
}

impl TcpConnectionProperties {
	fn send_max_chunk_count(&self) -> u32 {
		self.max_chunk_count
	}
	fn receive_max_message_size(&self) -> u32 {
		self.max_message_size
	}
}

/// Apply the min-rule negotiation: this side's send buffer shrinks to the peer's
/// receive buffer and vice versa, `maxMessageSize` takes the minimum of the two non-zero
/// values, and a negotiated buffer below the configured floor is rejected.
fn negotiate(mine: &TcpConnectionProperties, peer: &TcpConnectionProperties, config: &CoreConfig) -> Result<TcpConnectionProperties> {
	let send_buffer_size = mine.send_buffer_size.min(peer.receive_buffer_size);
	let receive_buffer_size = mine.receive_buffer_size.min(peer.send_buffer_size);

	if send_buffer_size < config.min_buffer_size || receive_buffer_size < config.min_buffer_size {
		return Err(fail!(StatusCode::BadInvalidArgument, "Negotiated buffer size fell below the {}-byte floor", config.min_buffer_size));
	}

	let max_message_size = match (mine.max_message_size, peer.max_message_size) {
		(0, other) => other,
		(mine, 0) => mine,
		(mine, other) => mine.min(other),
	};

	let max_chunk_count = match (mine.max_chunk_count, peer.max_chunk_count) {
		(0, other) => other,
		(mine, 0) => mine,
		(mine, other) => mine.min(other),
	};

	Ok(TcpConnectionProperties {
		protocol_version: mine.protocol_version.min(peer.protocol_version),
		receive_buffer_size,
		send_buffer_size,
		max_message_size,
		max_chunk_count,
	})
}

fn requested_lifetime(requested_ms: u32, config: &CoreConfig) -> Duration {
	Duration::from_millis(requested_ms as u64).max(config.min_connection_lifetime)
}

fn fresh_nonce(len: usize) -> Vec<u8> {
	let mut nonce = vec![0u8; len];
	rand::thread_rng().fill(&mut nonce[..]);
	nonce
}

fn now() -> SystemTime {
	SystemTime::now()
}

fn unix_seconds(t: SystemTime) -> u32 {
	t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

/// Repeatedly draw random non-zero `(channelId, tokenId)` candidates and hand them to
/// `propose_ids`, which should check for collisions against the owning listener's other
/// connections.
fn mint_ids(propose_ids: &mut impl FnMut(u32, u32) -> bool) -> Result<(u32, u32)> {
	let mut rng = rand::thread_rng();

	for _ in 0..5 {
		let channel_id: u32 = rng.gen_range(1..=u32::MAX);
		let token_id: u32 = rng.gen_range(1..=u32::MAX);

		if propose_ids(channel_id, token_id) {
			return Ok((channel_id, token_id));
		}
	}

	Err(fail!(StatusCode::BadTcpInternalError, "Could not allocate a unique channel/token id after 5 attempts"))
}

/// Renewal variant of [`mint_ids`]: the channel id is already fixed by the token being
/// renewed, only a fresh `tokenId` needs to be drawn and checked for collision.
fn mint_token_id(channel_id: u32, propose_ids: &mut impl FnMut(u32, u32) -> bool) -> Result<u32> {
	let mut rng = rand::thread_rng();

	for _ in 0..5 {
		let token_id: u32 = rng.gen_range(1..=u32::MAX);

		if propose_ids(channel_id, token_id) {
			return Ok(token_id);
		}
	}

	Err(fail!(StatusCode::BadTcpInternalError, "Could not allocate a unique token id after 5 attempts"))
}

#[cfg(test)]
mod tests {
	use sc_crypto::pki::TrustAll;
	use sc_crypto::policy::NoSecurity;

	use super::*;

	fn identity() -> LocalIdentity {
		let mut rng = rand::thread_rng();
		LocalIdentity { certificate_der: Vec::new(), private_key: rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap() }
	}

	#[test]
	fn client_and_server_negotiate_buffer_minimum() {
		let config = CoreConfig::default();
		let mut client = SecureConnection::new_client(&config, "opc.tcp://localhost:4840".into(), Arc::new(NoSecurity), SecurityMode::None);
		client.local_props.send_buffer_size = 8192;
		client.local_props.receive_buffer_size = 8192;

		let mut server = SecureConnection::new_server(&config, ListenerId::from_slab_key(0), Arc::new(NoSecurity), SecurityMode::None);
		server.local_props.send_buffer_size = 65535;
		server.local_props.receive_buffer_size = 65535;

		let hello = client.build_hello().unwrap();
		let ack = server.accept_hello(&hello, &config).unwrap();
		client.accept_ack(&ack, &config).unwrap();

		assert_eq!(client.negotiated.send_buffer_size, 8192);
		assert_eq!(server.negotiated.receive_buffer_size, 8192);
	}

	#[test]
	fn full_handshake_reaches_connected_with_none_policy() {
		let config = CoreConfig::default();
		let identity = identity();

		let mut client = SecureConnection::new_client(&config, "opc.tcp://localhost:4840".into(), Arc::new(NoSecurity), SecurityMode::None);
		let mut server = SecureConnection::new_server(&config, ListenerId::from_slab_key(0), Arc::new(NoSecurity), SecurityMode::None);

		let hello = client.build_hello().unwrap();
		let ack = server.accept_hello(&hello, &config).unwrap();
		client.accept_ack(&ack, &config).unwrap();

		let opn_request_bytes = client.begin_open(Duration::from_secs(60), &identity).unwrap();
		let header = decode::read_message_header(&opn_request_bytes).unwrap();
		let (_, _, body) = decode::decode_asymmetric(&opn_request_bytes, server.policy.as_ref(), false, false, None, None).unwrap();
		assert_eq!(header.msg_type, MessageType::Opn);
		let request = OpenRequest::decode(&body).unwrap();

		let response = server.accept_open_issue(&request, &config, &identity, |_, _| true).unwrap();
		assert_eq!(server.state, ConnState::ScConnected);

		client.accept_open_issue_response(&response).unwrap();
		assert_eq!(client.state, ConnState::ScConnected);
		assert_eq!(client.secure_channel_id, server.secure_channel_id);
	}

	#[test]
	fn closing_without_a_token_yields_no_outbox() {
		let config = CoreConfig::default();
		let mut client = SecureConnection::new_client(&config, "opc.tcp://localhost:4840".into(), Arc::new(NoSecurity), SecurityMode::None);
		assert!(client.close(StatusCode::BadTimeout).is_empty());
	}

	#[test]
	fn pki_rejection_surfaces_as_untrusted() {
		assert!(TrustAll.is_trusted(b"anything"));
	}

	#[test]
	fn multi_chunk_message_reassembles_across_intermediate_chunks() {
		let config = CoreConfig::default();
		let mut server = SecureConnection::new_server(&config, ListenerId::from_slab_key(0), Arc::new(NoSecurity), SecurityMode::None);
		server.negotiated.max_chunk_count = 5;
		server.secure_channel_id = 7;
		server.current_token = Some(SecurityToken::new(7, 1, now(), Duration::from_secs(60)));

		let keys = encode::SymmetricSenderKeys { signing_key: &[], encryption_key: &[], iv: &[] };
		let mut seq = crate::wire::INITIAL_SEQUENCE_NUMBER;
		let body = vec![0xCDu8; 500];
		let chunks = encode::encode_symmetric(MessageType::Msg, 7, 1, 3, &body, 256, 5, false, server.policy.as_ref(), keys, &mut seq).unwrap();
		assert!(chunks.len() >= 2, "test setup should force a multi-chunk split");

		let identity = identity();
		let pki = TrustAll;

		let mut decoded = Vec::new();
		for chunk in &chunks {
			decoded.extend(server.feed(chunk, &identity, &pki).unwrap());
		}

		assert_eq!(decoded.len(), 1);
		assert_eq!(decoded[0].body, body);
		assert!(server.chunk_assembly.is_empty());
	}

	#[test]
	fn abort_chunk_discards_accumulated_data_without_emitting_a_message() {
		let config = CoreConfig::default();
		let mut server = SecureConnection::new_server(&config, ListenerId::from_slab_key(0), Arc::new(NoSecurity), SecurityMode::None);
		server.negotiated.max_chunk_count = 5;
		server.secure_channel_id = 7;
		server.current_token = Some(SecurityToken::new(7, 1, now(), Duration::from_secs(60)));

		let identity = identity();
		let pki = TrustAll;

		let partial = {
			let keys = encode::SymmetricSenderKeys { signing_key: &[], encryption_key: &[], iv: &[] };
			let mut seq = crate::wire::INITIAL_SEQUENCE_NUMBER;
			let mut chunk = encode::encode_symmetric(MessageType::Msg, 7, 1, 3, b"partial body", 8192, 0, false, server.policy.as_ref(), keys, &mut seq).unwrap();
			let bytes = chunk.remove(0);
			bytes
		};

		// Flip the already-Final chunk's isFinal byte to Abort, the way a peer abandoning a
		// logical message mid-stream would: no message should ever be
		// produced and the assembly buffer must come back clean.
		let mut abort_chunk = partial;
		abort_chunk[3] = Final::Abort.byte();
		MessageHeader::patch_message_size(&mut abort_chunk, abort_chunk.len() as u32);

		let decoded = server.feed(&abort_chunk, &identity, &pki).unwrap();
		assert!(decoded.is_empty());
		assert!(server.chunk_assembly.is_empty());
	}
}
