//! The per-connection pending-request table: `requestId -> PendingRequest`, with a timeout
//! timer per entry.

use std::collections::HashMap;

use ahash::RandomState;
use stakker::FixedTimerKey;

use crate::wire::MessageType;

/// One outstanding request this connection is waiting on a matching response for.
pub struct PendingRequest {
	/// The handle the services layer used to identify this request; echoed back on
	/// `SC_REQUEST_TIMEOUT` or alongside the matched response.
	pub request_handle: u32,
	/// Which message type the response is expected to arrive as.
	pub msg_type: MessageType,
	/// The armed per-request timeout, canceled once a response matches.
	pub timer: FixedTimerKey,
}

/// `requestId -> PendingRequest`, hashed with `ahash` since this is a pure in-process lookup
/// with no adversarial-input hashing concern.
#[derive(Default)]
pub struct PendingRequestTable {
	entries: HashMap<u32, PendingRequest, RandomState>,
}

impl PendingRequestTable {
	pub fn insert(&mut self, request_id: u32, entry: PendingRequest) {
		self.entries.insert(request_id, entry);
	}

	pub fn remove(&mut self, request_id: u32) -> Option<PendingRequest> {
		self.entries.remove(&request_id)
	}

	pub fn get(&self, request_id: u32) -> Option<&PendingRequest> {
		self.entries.get(&request_id)
	}

	pub fn contains(&self, request_id: u32) -> bool {
		self.entries.contains_key(&request_id)
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn drain(&mut self) -> impl Iterator<Item = (u32, PendingRequest)> + '_ {
		self.entries.drain()
	}
}
