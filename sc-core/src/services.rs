//! Messages exchanged with the OPC UA services layer: `sc-core` defines
//! their shapes and posts/consumes them; it never implements a services layer itself.
//!
//! In process, these travel as plain method calls / `stakker::Fwd` payloads rather than as
//! entries on [`crate::event::EventQueue`] — that queue exists for the narrower
//! enqueue-as-next ordering guarantee, not as a generic message bus.

use sc_utils::status::StatusCode;

use crate::ids::ConnId;
use crate::wire::SecurityMode;

/// Requests the services layer posts to a [`crate::Core`].
#[derive(Debug, Clone)]
pub enum ServiceRequest {
	/// `SC_CONNECT`: open a client secure channel. `server_certificate` is the DER the services
	/// layer already holds for this endpoint from discovery (`GetEndpoints`, out of scope here)
	/// — empty for a `None`-mode channel, required to encrypt/verify the OPN exchange otherwise.
	Connect { url: String, policy_uri: String, mode: SecurityMode, requested_lifetime_ms: u32, server_certificate: Vec<u8> },
	/// `SC_DISCONNECT`: close an established connection. A duplicate disconnect of an
	/// already-closed connection is a no-op.
	Disconnect { conn_id: ConnId },
	/// `SC_SERVICE_SND_MSG`: send a request/response body on an established connection.
	SendMessage { conn_id: ConnId, body: Vec<u8>, request_handle: u32, timeout_ms: u32 },
}

/// Notifications [`crate::Core`] delivers back to the services layer.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
	/// `SC_CONNECTED` (client) / `EP_CONNECTED` (server accepted a new connection).
	Connected { conn_id: ConnId },
	/// `SC_DISCONNECTED`: graceful or abnormal close of a previously connected channel.
	Disconnected { conn_id: ConnId, reason: StatusCode },
	/// `SC_CONNECTION_TIMEOUT`: the connection never reached `SC_CONNECTED`.
	ConnectionTimeout { conn_id: ConnId },
	/// `SC_SERVICE_RCV_MSG`: a complete MSG body, with the request id the response (if any)
	/// must echo.
	MessageReceived { conn_id: ConnId, request_id: u32, body: Vec<u8> },
	/// `SC_SND_FAILURE`: a send attempt could not be completed.
	SendFailure { conn_id: ConnId, request_handle: u32, status: StatusCode },
	/// `SC_REQUEST_TIMEOUT`: a request's per-request timer expired with no matching response.
	RequestTimeout { conn_id: ConnId, request_handle: u32 },
}
