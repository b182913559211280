//! Endpoint listener state: the fixed security policy/mode an inbound socket was
//! accepted on, and the bookkeeping needed to keep minted `(channelId, tokenId)` pairs unique
//! across the connections it has spawned.

use std::sync::Arc;

use sc_crypto::SecurityPolicy;
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;

use crate::ids::ConnId;
use crate::wire::SecurityMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
	Opened,
	Closed,
}

/// One configured endpoint: a security policy/mode pair an inbound socket accepts
/// connections under, plus the set of connections currently spawned from it.
pub struct SecureListener {
	state: ListenerState,
	pub endpoint_url: String,
	pub policy: Arc<dyn SecurityPolicy>,
	pub mode: SecurityMode,
	max_connections: usize,
	connections: Vec<ConnId>,
}

impl SecureListener {
	pub fn new(endpoint_url: String, policy: Arc<dyn SecurityPolicy>, mode: SecurityMode, max_connections: usize) -> Self {
		Self { state: ListenerState::Opened, endpoint_url, policy, mode, max_connections, connections: Vec::new() }
	}

	pub fn state(&self) -> ListenerState {
		self.state
	}

	pub fn connections(&self) -> &[ConnId] {
		&self.connections
	}

	/// Record a newly accepted connection against this listener's `max_socket_connections`
	/// budget. Rejects once full or once the
	/// listener has been closed.
	pub fn try_track(&mut self, conn_id: ConnId) -> Result {
		if self.state != ListenerState::Opened {
			return Err(fail!(StatusCode::BadTcpInternalError, "Listener {} is closed, refusing new connection", self.endpoint_url));
		}
		if self.connections.len() >= self.max_connections {
			return Err(fail!(StatusCode::BadOutOfMemory, "Listener {} is at its {}-connection limit", self.endpoint_url, self.max_connections));
		}

		self.connections.push(conn_id);
		Ok(())
	}

	/// Drop a connection that has closed or been torn down.
	pub fn untrack(&mut self, conn_id: ConnId) {
		self.connections.retain(|&id| id != conn_id);
	}

	pub fn close(&mut self) {
		self.state = ListenerState::Closed;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sc_crypto::policy::NoSecurity;

	fn listener(max: usize) -> SecureListener {
		SecureListener::new("opc.tcp://localhost:4840".into(), Arc::new(NoSecurity), SecurityMode::None, max)
	}

	#[test]
	fn tracks_connections_up_to_its_limit() {
		let mut listener = listener(2);
		let a = ConnId::from_slab_key(0);
		let b = ConnId::from_slab_key(1);
		let c = ConnId::from_slab_key(2);

		listener.try_track(a).unwrap();
		listener.try_track(b).unwrap();
		assert!(listener.try_track(c).is_err());
		assert_eq!(listener.connections().len(), 2);
	}

	#[test]
	fn untrack_removes_a_closed_connection() {
		let mut listener = listener(2);
		let a = ConnId::from_slab_key(0);
		listener.try_track(a).unwrap();
		listener.untrack(a);
		assert!(listener.connections().is_empty());
	}

	#[test]
	fn closed_listener_refuses_further_connections() {
		let mut listener = listener(2);
		listener.close();
		assert!(listener.try_track(ConnId::from_slab_key(0)).is_err());
	}
}
