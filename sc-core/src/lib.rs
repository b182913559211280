//! The event dispatcher: a single `stakker` actor owning every secure connection and endpoint
//! listener this process drives. It fans out across a slab of connections addressed by
//! [`ids::ConnId`], looking one up per incoming event the way an actor managing many sockets
//! looks up the one a given event belongs to.
//!
//! `Core` is the only thing in this crate that touches a socket ([`sc_runtime::Io`],
//! [`sc_runtime::Listener`]) or a timer (`stakker`'s `cx.after`/`cx.timer_del`). Everything
//! else — chunk framing and crypto ([`chunk`]), the connection FSM ([`connection`]), the
//! listener FSM ([`listener`]) — is pure state transition logic that `Core` drives from the
//! outside.

pub mod body;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod event;
pub mod ids;
pub mod listener;
pub mod request;
pub mod services;
pub mod token;
pub mod wire;

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use log::{info, warn};
use sc_crypto::pki::Pki;
use sc_runtime::Io;
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;
use slab::Slab;
use stakker::{fwd_to, Fwd, CX};

use crate::body::{AcknowledgeBody, ErrorBody, HelloBody, OpenRequest, OpenResponse};
use crate::config::{CoreConfig, LocalIdentity};
use crate::connection::{ConnState, Role, SecureConnection};
use crate::event::EventQueue;
use crate::ids::{ConnId, ListenerId};
use crate::listener::SecureListener;
use crate::request::PendingRequest;
use crate::services::{ServiceEvent, ServiceRequest};
use crate::wire::{MessageType, RequestType, SecurityMode};

struct ConnSlot {
	conn: SecureConnection,
	io: Io<TcpStream>,
	/// What `ACK`/renewal should request as the token lifetime, clamped against
	/// `min_connection_lifetime` at the point it's actually used.
	requested_lifetime: Duration,
}

struct ListenerSlot {
	state: SecureListener,
	/// Keeps the reactor registration alive; dropped (and so unregistered) alongside `state`.
	socket: sc_runtime::Listener,
}

/// The event dispatcher. One instance per process, constructed once with [`Core::init`] and
/// driven thereafter by `stakker`'s event loop plus whatever reads/timeouts the reactor
/// ([`sc_runtime`]) delivers back into it.
pub struct Core {
	config: CoreConfig,
	identity: Arc<LocalIdentity>,
	pki: Arc<dyn Pki>,
	connections: Slab<ConnSlot>,
	listeners: Slab<ListenerSlot>,
	events: Fwd<ServiceEvent>,
}

impl Core {
	pub fn init(_cx: CX![], config: CoreConfig, identity: LocalIdentity, pki: Arc<dyn Pki>, events: Fwd<ServiceEvent>) -> Option<Self> {
		Some(Self { config, identity: Arc::new(identity), pki, connections: Slab::new(), listeners: Slab::new(), events })
	}

	/// Single entry point for the services layer.
	pub fn handle_request(&mut self, cx: CX![], request: ServiceRequest) {
		match request {
			ServiceRequest::Connect { url, policy_uri, mode, requested_lifetime_ms, server_certificate } => {
				self.connect(cx, url, policy_uri, mode, requested_lifetime_ms, server_certificate)
			}
			ServiceRequest::Disconnect { conn_id } => self.disconnect(cx, conn_id),
			ServiceRequest::SendMessage { conn_id, body, request_handle, timeout_ms } => self.send_message(cx, conn_id, body, request_handle, timeout_ms),
		}
	}

	// ---- SC_CONNECT / endpoint lifecycle --------------------------------------------------

	fn connect(&mut self, cx: CX![], url: String, policy_uri: String, mode: SecurityMode, requested_lifetime_ms: u32, server_certificate: Vec<u8>) {
		let Some(policy) = sc_crypto::policy_for_uri(&policy_uri) else {
			warn!("SC_CONNECT to {url} names an unknown security policy {policy_uri}");
			return;
		};

		if self.connections.len() >= self.config.max_secure_connections {
			warn!("Connection slot table exhausted, refusing SC_CONNECT to {url}");
			return;
		}

		let addr = match resolve_endpoint(&url) {
			Ok(addr) => addr,
			Err(status) => {
				warn!("SC_CONNECT to {url} failed to resolve: {status:?}");
				return;
			}
		};

		let stream = match TcpStream::connect(addr) {
			Ok(stream) => stream,
			Err(err) => {
				warn!("SC_CONNECT: TCP connect to {addr} failed: {err}");
				return;
			}
		};

		if let Err(err) = stream.set_nonblocking(true) {
			warn!("SC_CONNECT: failed to mark socket non-blocking: {err}");
			return;
		}

		let peer_public_key = if mode != SecurityMode::None {
			match sc_crypto::pki::peer_public_key(&server_certificate) {
				Ok(key) => Some(key),
				Err(status) => {
					warn!("SC_CONNECT to {url}: server certificate did not carry a usable key: {status:?}");
					return;
				}
			}
		} else {
			None
		};

		// Peek the slot this connection will land in without holding the slab borrow across
		// the self-touching work below; nothing else touches `self.connections` in between,
		// so the key `insert` hands back at the end is guaranteed to match.
		let conn_id = ConnId::from_slab_key(self.connections.vacant_entry().key());

		let io = Self::wire_connection_io(cx, conn_id, stream);

		let mut conn = SecureConnection::new_client(&self.config, url, policy, mode);
		conn.peer_public_key = peer_public_key;

		let hello = match conn.build_hello() {
			Ok(hello) => hello,
			Err(status) => {
				warn!("SC_CONNECT: failed to build HEL: {status:?}");
				return;
			}
		};
		let Ok(hello_body) = hello.encode() else {
			warn!("SC_CONNECT: HEL body failed to encode");
			return;
		};

		conn.connection_establish_timer = self.arm_connection_timer(cx, conn_id);

		if let Err(err) = io.write(&crate::chunk::encode_flat(MessageType::Hel, &hello_body)) {
			warn!("SC_CONNECT: failed writing HEL on {conn_id}: {err:?}");
		}

		let requested_lifetime = Duration::from_millis(requested_lifetime_ms as u64).max(self.config.min_connection_lifetime);
		let key = self.connections.insert(ConnSlot { conn, io, requested_lifetime });
		debug_assert_eq!(key, conn_id.slab_key());
	}

	/// `SC_DISCONNECT`: idempotent — disconnecting an already-closed or unknown connection id
	/// is silently ignored rather than treated as an error.
	fn disconnect(&mut self, cx: CX![], conn_id: ConnId) {
		if self.connections.get(conn_id.slab_key()).is_none() {
			return;
		}

		self.close_connection(cx, conn_id, StatusCode::Good, true, Some(ServiceEvent::Disconnected { conn_id, reason: StatusCode::Good }));
	}

	/// Bind a new endpoint listener under a fixed security policy/mode. Not itself
	/// part of [`ServiceRequest`] — binding a listening socket is a deployment-time decision the
	/// services layer makes once, not a per-message service call.
	pub fn open_listener(&mut self, cx: CX![], bind_addr: SocketAddr, endpoint_url: String, policy_uri: String, mode: SecurityMode) -> Result<ListenerId> {
		let policy =
			sc_crypto::policy_for_uri(&policy_uri).ok_or_else(|| fail!(StatusCode::BadInvalidArgument, "Unknown security policy URI {policy_uri}"))?;

		let entry = self.listeners.vacant_entry();
		let listener_id = ListenerId::from_slab_key(entry.key());

		let base = fwd_to!([cx], on_accept() as (ListenerId, TcpStream, SocketAddr));
		let accept_fwd = Fwd::new(move |(stream, addr): (TcpStream, SocketAddr)| base.fwd((listener_id, stream, addr)));

		let socket = sc_runtime::Listener::bind(bind_addr, accept_fwd)?;
		let state = SecureListener::new(endpoint_url, policy, mode, self.config.max_socket_connections);

		entry.insert(ListenerSlot { state, socket });
		info!("Listener {listener_id} bound on {bind_addr}");
		Ok(listener_id)
	}

	/// Closing a listener broadcasts teardown to every connection it spawned.
	pub fn close_listener(&mut self, cx: CX![], listener_id: ListenerId) {
		let Some(slot) = self.listeners.get_mut(listener_id.slab_key()) else { return };
		slot.state.close();

		let conn_ids: Vec<ConnId> = slot.state.connections().to_vec();
		for conn_id in conn_ids {
			self.close_connection(cx, conn_id, StatusCode::BadSecureChannelClosed, true, Some(ServiceEvent::Disconnected { conn_id, reason: StatusCode::BadSecureChannelClosed }));
		}

		self.listeners.remove(listener_id.slab_key());
	}

	fn on_accept(&mut self, cx: CX![], listener_id: ListenerId, stream: TcpStream, addr: SocketAddr) {
		let Some(listener_slot) = self.listeners.get(listener_id.slab_key()) else { return };

		if self.connections.len() >= self.config.max_secure_connections {
			warn!("Connection slot table exhausted, refusing accepted socket from {addr} on {listener_id}");
			return;
		}

		let policy = listener_slot.state.policy.clone();
		let mode = listener_slot.state.mode;

		let conn_id = ConnId::from_slab_key(self.connections.vacant_entry().key());

		let io = Self::wire_connection_io(cx, conn_id, stream);

		let mut conn = SecureConnection::new_server(&self.config, listener_id, policy, mode);
		conn.connection_establish_timer = self.arm_connection_timer(cx, conn_id);

		let key = self.connections.insert(ConnSlot { conn, io, requested_lifetime: self.config.min_connection_lifetime });
		debug_assert_eq!(key, conn_id.slab_key());

		if let Some(listener_slot) = self.listeners.get_mut(listener_id.slab_key()) {
			if listener_slot.state.try_track(conn_id).is_err() {
				self.connections.remove(conn_id.slab_key());
			}
		}
	}

	/// Register a freshly accepted or dialed socket with the reactor, routing its bytes and
	/// failures back through this actor tagged with `conn_id` by wrapping a narrower `Fwd`
	/// around one already bound to this actor.
	fn wire_connection_io(cx: CX![], conn_id: ConnId, stream: TcpStream) -> Io<TcpStream> {
		let read_base = fwd_to!([cx], on_bytes() as (ConnId, BytesMut));
		let read_fwd = Fwd::new(move |bytes: BytesMut| read_base.fwd((conn_id, bytes)));

		let failure_base = fwd_to!([cx], on_failure() as (ConnId));
		let failure_fwd = Fwd::new(move |_: ()| failure_base.fwd(conn_id));

		Io::new(stream, read_fwd, failure_fwd)
	}

	fn arm_connection_timer(&mut self, cx: CX![], conn_id: ConnId) -> stakker::FixedTimerKey {
		let actor = cx.access_actor().clone();
		cx.after(self.config.connection_timeout, move |s| actor.apply(s, move |this, cx| this.on_connection_timeout(cx, conn_id)))
	}

	fn on_connection_timeout(&mut self, cx: CX![], conn_id: ConnId) {
		let Some(slot) = self.connections.get(conn_id.slab_key()) else { return };
		if matches!(slot.conn.state, ConnState::ScConnected | ConnState::ScConnectedRenew) {
			return;
		}

		self.close_connection(cx, conn_id, StatusCode::BadTimeout, true, Some(ServiceEvent::ConnectionTimeout { conn_id }));
	}

	/// The reactor reports a read error or an orderly peer shutdown the same way: no more
	/// bytes are ever coming, so tear the connection down without attempting to write a
	/// farewell chunk the socket likely can't take anyway.
	fn on_failure(&mut self, cx: CX![], conn_id: ConnId) {
		let Some(slot) = self.connections.get(conn_id.slab_key()) else { return };
		let event = if matches!(slot.conn.state, ConnState::ScConnected | ConnState::ScConnectedRenew) {
			ServiceEvent::Disconnected { conn_id, reason: StatusCode::BadTcpInternalError }
		} else {
			ServiceEvent::ConnectionTimeout { conn_id }
		};

		self.close_connection(cx, conn_id, StatusCode::BadTcpInternalError, false, Some(event));
	}

	// ---- SC_SERVICE_SND_MSG ----------------------------------------------------------------

	fn send_message(&mut self, cx: CX![], conn_id: ConnId, body: Vec<u8>, request_handle: u32, timeout_ms: u32) {
		let Some(slot) = self.connections.get_mut(conn_id.slab_key()) else {
			self.events.fwd(ServiceEvent::SendFailure { conn_id, request_handle, status: StatusCode::BadSecureChannelClosed });
			return;
		};

		if !matches!(slot.conn.state, ConnState::ScConnected | ConnState::ScConnectedRenew) {
			self.events.fwd(ServiceEvent::SendFailure { conn_id, request_handle, status: StatusCode::BadSecureChannelClosed });
			return;
		}

		let request_id = slot.conn.next_request_id();
		let outbox = match slot.conn.encode_symmetric(MessageType::Msg, body, request_id) {
			Ok(outbox) => outbox,
			Err(status) => {
				self.events.fwd(ServiceEvent::SendFailure { conn_id, request_handle, status });
				return;
			}
		};

		for chunk in &outbox {
			if let Err(status) = slot.io.write(chunk) {
				self.events.fwd(ServiceEvent::SendFailure { conn_id, request_handle, status });
				return;
			}
		}

		let actor = cx.access_actor().clone();
		let timer = cx.after(Duration::from_millis(timeout_ms as u64), move |s| actor.apply(s, move |this, cx| this.on_request_timeout(cx, conn_id, request_id)));

		slot.conn.pending_requests.insert(request_id, PendingRequest { request_handle, msg_type: MessageType::Msg, timer });
	}

	fn on_request_timeout(&mut self, _cx: CX![], conn_id: ConnId, request_id: u32) {
		let Some(slot) = self.connections.get_mut(conn_id.slab_key()) else { return };
		let Some(pending) = slot.conn.pending_requests.remove(request_id) else { return };
		self.events.fwd(ServiceEvent::RequestTimeout { conn_id, request_handle: pending.request_handle });
	}

	// ---- Inbound bytes ----------------------------------------------------------------------

	fn on_bytes(&mut self, cx: CX![], conn_id: ConnId, bytes: BytesMut) {
		let Some(slot) = self.connections.get_mut(conn_id.slab_key()) else { return };

		let messages = match slot.conn.feed(&bytes, &self.identity, self.pki.as_ref()) {
			Ok(messages) => messages,
			Err(status) => {
				self.close_connection(cx, conn_id, status, true, Some(ServiceEvent::Disconnected { conn_id, reason: status }));
				return;
			}
		};

		for msg in messages {
			if let Err(status) = self.handle_message(cx, conn_id, msg.msg_type, msg.request_id, msg.body) {
				self.close_connection(cx, conn_id, status, true, Some(ServiceEvent::Disconnected { conn_id, reason: status }));
				return;
			}
		}
	}

	fn handle_message(&mut self, cx: CX![], conn_id: ConnId, msg_type: MessageType, request_id: u32, body: Vec<u8>) -> Result {
		match msg_type {
			MessageType::Hel => self.handle_hello(conn_id, &body),
			MessageType::Ack => self.handle_ack(conn_id, &body),
			MessageType::Opn => self.handle_opn(cx, conn_id, request_id, &body),
			MessageType::Msg => self.handle_msg(cx, conn_id, request_id, body),
			MessageType::Err => {
				self.handle_err(cx, conn_id, &body);
				Ok(())
			}
			MessageType::Clo => {
				self.handle_clo(cx, conn_id);
				Ok(())
			}
		}
	}

	fn handle_hello(&mut self, conn_id: ConnId, body: &[u8]) -> Result {
		let Some(slot) = self.connections.get_mut(conn_id.slab_key()) else { return Ok(()) };

		if slot.conn.role != Role::Server || slot.conn.state != ConnState::TcpInit {
			return Err(fail!(StatusCode::BadTcpMessageTypeInvalid, "Unexpected HEL on {conn_id}"));
		}

		let hello = HelloBody::decode(body)?;
		let ack = slot.conn.accept_hello(&hello, &self.config)?;
		slot.io.write(&crate::chunk::encode_flat(MessageType::Ack, &ack.encode()))
	}

	fn handle_ack(&mut self, conn_id: ConnId, body: &[u8]) -> Result {
		let Some(slot) = self.connections.get_mut(conn_id.slab_key()) else { return Ok(()) };

		if slot.conn.role != Role::Client || slot.conn.state != ConnState::TcpNegotiate {
			return Err(fail!(StatusCode::BadTcpMessageTypeInvalid, "Unexpected ACK on {conn_id}"));
		}

		let ack = AcknowledgeBody::decode(body)?;
		slot.conn.accept_ack(&ack, &self.config)?;

		let chunk = slot.conn.begin_open(slot.requested_lifetime, &self.identity)?;
		slot.io.write(&chunk)
	}

	fn handle_err(&mut self, cx: CX![], conn_id: ConnId, body: &[u8]) {
		if self.connections.get(conn_id.slab_key()).is_none() {
			return;
		}

		let reason = ErrorBody::decode(body).map(|err| err.error).unwrap_or(StatusCode::BadSecureChannelClosed);

		self.close_connection(cx, conn_id, reason, false, Some(ServiceEvent::Disconnected { conn_id, reason }));
	}

	fn handle_clo(&mut self, cx: CX![], conn_id: ConnId) {
		if self.connections.get(conn_id.slab_key()).is_none() {
			return;
		}

		// A CLO receipt is itself the close signal: tear down immediately and rely
		// on dropping the `Io`/`TcpStream` to ask the socket layer to close as a belt-and-braces
		// measure, rather than writing anything further back.
		self.close_connection(cx, conn_id, StatusCode::BadSecureChannelClosed, false, Some(ServiceEvent::Disconnected { conn_id, reason: StatusCode::BadSecureChannelClosed }));
	}

	fn handle_opn(&mut self, cx: CX![], conn_id: ConnId, request_id: u32, body: &[u8]) -> Result {
		let role = self.connections.get(conn_id.slab_key()).map(|slot| slot.conn.role).ok_or(StatusCode::BadTcpSecureChannelUnknown)?;

		match role {
			Role::Server => self.handle_opn_server(cx, conn_id, request_id, body),
			Role::Client => self.handle_opn_client(cx, conn_id, body),
		}
	}

	fn handle_opn_server(&mut self, cx: CX![], conn_id: ConnId, request_id: u32, body: &[u8]) -> Result {
		let request = OpenRequest::decode(body)?;

		let state = self.connections.get(conn_id.slab_key()).map(|slot| slot.conn.state).ok_or(StatusCode::BadTcpSecureChannelUnknown)?;
		let listener_id = self.connections.get(conn_id.slab_key()).and_then(|slot| slot.conn.listener_id);

		// Collision candidates drawn from the owning listener's other connections, gathered up
		// front so the closure handed to `accept_open_issue`/`accept_open_renew` doesn't need a
		// second mutable borrow of `self` while one is already held for `conn`.
		let sibling_ids: Vec<ConnId> = match listener_id.and_then(|listener_id| self.listeners.get(listener_id.slab_key())) {
			Some(listener_slot) => listener_slot.state.connections().iter().copied().filter(|&id| id != conn_id).collect(),
			None => Vec::new(),
		};
		let active_ids: Vec<(u32, u32)> = sibling_ids
			.into_iter()
			.filter_map(|id| self.connections.get(id.slab_key()))
			.filter_map(|slot| slot.conn.current_token.map(|token| (token.channel_id, token.token_id)))
			.collect();

		let slot = self.connections.get_mut(conn_id.slab_key()).ok_or(StatusCode::BadTcpSecureChannelUnknown)?;
		let free_of_collision = |channel_id: u32, token_id: u32| !active_ids.iter().any(|&(c, t)| c == channel_id || t == token_id);

		match (request.request_type, state) {
			(RequestType::Issue, ConnState::ScInit) => {
				let response = slot.conn.accept_open_issue(&request, &self.config, &self.identity, free_of_collision)?;
				let chunk = slot.conn.encode_open_response(&response, request_id, &self.identity)?;
				slot.io.write(&chunk)?;
				cx.timer_del(slot.conn.connection_establish_timer);
				slot.conn.connection_establish_timer = stakker::FixedTimerKey::default();
				self.events.fwd(ServiceEvent::Connected { conn_id });
				Ok(())
			}
			(RequestType::Renew, ConnState::ScConnected) => {
				let outbox = slot.conn.accept_open_renew(&request, &self.config, request_id, free_of_collision)?;
				for chunk in &outbox {
					slot.io.write(chunk)?;
				}
				Ok(())
			}
			_ => Err(fail!(StatusCode::BadSecurityChecksFailed, "OPN {:?} not valid from state {:?}", request.request_type, state)),
		}
	}

	fn handle_opn_client(&mut self, cx: CX![], conn_id: ConnId, body: &[u8]) -> Result {
		let response = OpenResponse::decode(body)?;

		let state = self.connections.get(conn_id.slab_key()).map(|slot| slot.conn.state).ok_or(StatusCode::BadTcpSecureChannelUnknown)?;
		let slot = self.connections.get_mut(conn_id.slab_key()).ok_or(StatusCode::BadTcpSecureChannelUnknown)?;

		let (renew_delay, just_connected) = match state {
			ConnState::ScConnecting => (slot.conn.accept_open_issue_response(&response)?, true),
			ConnState::ScConnectedRenew => (slot.conn.accept_renew_response(&response)?, false),
			_ => return Err(fail!(StatusCode::BadInvalidArgument, "Unexpected OPN response on {conn_id} in state {state:?}")),
		};

		if just_connected {
			cx.timer_del(slot.conn.connection_establish_timer);
			slot.conn.connection_establish_timer = stakker::FixedTimerKey::default();
		} else {
			cx.timer_del(slot.conn.token_renew_timer);
		}

		let actor = cx.access_actor().clone();
		slot.conn.token_renew_timer = cx.after(renew_delay, move |s| actor.apply(s, move |this, cx| this.on_token_renew(cx, conn_id)));

		if just_connected {
			self.events.fwd(ServiceEvent::Connected { conn_id });
		}

		Ok(())
	}

	/// Client-only: the renewal timer fired.
	fn on_token_renew(&mut self, cx: CX![], conn_id: ConnId) {
		let Some(slot) = self.connections.get_mut(conn_id.slab_key()) else { return };
		if slot.conn.state != ConnState::ScConnected {
			return;
		}

		let outcome = slot.conn.begin_renew(slot.requested_lifetime).and_then(|outbox| {
			for chunk in &outbox {
				slot.io.write(chunk)?;
			}
			Ok(())
		});

		if let Err(status) = outcome {
			self.close_connection(cx, conn_id, status, true, Some(ServiceEvent::Disconnected { conn_id, reason: status }));
		}
	}

	fn handle_msg(&mut self, cx: CX![], conn_id: ConnId, request_id: u32, body: Vec<u8>) -> Result {
		let Some(slot) = self.connections.get_mut(conn_id.slab_key()) else { return Ok(()) };

		if slot.conn.role == Role::Client {
			let pending = slot
				.conn
				.pending_requests
				.remove(request_id)
				.ok_or_else(|| fail!(StatusCode::BadSecurityChecksFailed, "MSG on {conn_id} echoes an unknown request id {request_id}"))?;
			cx.timer_del(pending.timer);
		}

		self.events.fwd(ServiceEvent::MessageReceived { conn_id, request_id, body });
		Ok(())
	}

	// ---- Teardown ---------------------------------------------------------------------------

	/// Tear a connection all the way down: cancel its timers, optionally write a farewell
	/// CLO/ERR chunk, untrack it from its listener and drop its slot (wiping any live key
	/// material via `Secret`'s `Drop`), then notify the services layer.
	///
	/// `send_farewell` is false when the close was itself triggered by receiving the peer's own
	/// CLO/ERR or by a dead socket — there's either nothing more to say or nowhere left to say
	/// it.
	fn close_connection(&mut self, cx: CX![], conn_id: ConnId, reason: StatusCode, send_farewell: bool, event: Option<ServiceEvent>) {
		let Some(slot) = self.connections.get_mut(conn_id.slab_key()) else { return };

		cx.timer_del(slot.conn.connection_establish_timer);
		cx.timer_del(slot.conn.token_renew_timer);
		for (_, pending) in slot.conn.pending_requests.drain() {
			cx.timer_del(pending.timer);
		}

		if send_farewell {
			// Every farewell chunk is queued ahead of anything else pending before being
			// flushed, so a multi-chunk CLO/ERR always reaches the wire in order and before
			// the slot is gone.
			let mut pending_writes = EventQueue::new();
			for chunk in slot.conn.close(reason) {
				pending_writes.enqueue_next(chunk);
			}

			while let Some(chunk) = pending_writes.pop() {
				if let Err(err) = slot.io.write(&chunk) {
					warn!("Failed writing farewell chunk on {conn_id}: {err:?}");
					break;
				}
			}
		} else {
			slot.conn.state = ConnState::ScClosed;
		}

		let listener_id = slot.conn.listener_id;
		self.connections.remove(conn_id.slab_key());

		if let Some(listener_id) = listener_id {
			if let Some(listener_slot) = self.listeners.get_mut(listener_id.slab_key()) {
				listener_slot.state.untrack(conn_id);
			}
		}

		if let Some(event) = event {
			self.events.fwd(event);
		}
	}
}

/// `opc.tcp://host:port[/path]` to a dialable address. DNS resolution (and thus blocking
/// briefly during `SC_CONNECT`) is accepted here as a one-time setup cost, not something on
/// the hot path.
fn resolve_endpoint(url: &str) -> Result<SocketAddr> {
	let rest = url
		.strip_prefix("opc.tcp://")
		.ok_or_else(|| fail!(StatusCode::BadTcpEndpointUrlInvalid, "Endpoint URL {url} is missing the opc.tcp:// scheme"))?;

	let host_port = rest.split('/').next().unwrap_or(rest);

	host_port
		.to_socket_addrs()
		.map_err(|err| fail!(StatusCode::BadTcpEndpointUrlInvalid, "Could not resolve {host_port}: {err}"))?
		.next()
		.ok_or_else(|| fail!(StatusCode::BadTcpEndpointUrlInvalid, "{host_port} resolved to no addresses"))
}
