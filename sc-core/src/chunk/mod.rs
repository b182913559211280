//! The chunk engine: frames/unframes OPC UA TCP messages and applies the
//! asymmetric (OPN) or symmetric (MSG/CLO) crypto envelope around them.
//!
//! `header` holds the pure wire-layout structs; `decode`/`encode` hold the pipelines that
//! turn a raw chunk into (or out of) a `(msgType, requestId, body)` tuple. Multi-chunk
//! reassembly is implemented (the `Final::Intermediate`/`Abort` cases) but the only path the
//! connection FSM actually arms limits `receiveMaxChunkCount` to 1, so in practice every
//! chunk is `Final`.

pub mod decode;
pub mod encode;
pub mod header;

use crate::wire::{Final, MessageType};
use header::MessageHeader;

/// Frame a HEL/ACK/ERR body as a single flat chunk: these message types carry no security
/// header at all, unlike OPN/MSG/CLO.
pub fn encode_flat(msg_type: MessageType, body: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(12 + body.len());
	MessageHeader { msg_type, is_final: Final::Final, message_size: 0, secure_channel_id: 0 }.write(&mut out);
	out.extend_from_slice(body);

	let message_size = out.len() as u32;
	MessageHeader::patch_message_size(&mut out, message_size);
	out
}

/// Per-connection state for reassembling a logical message out of `Intermediate`-marked
/// chunks.
#[derive(Default)]
pub struct ChunkAssembly {
	msg_type: Option<MessageType>,
	body: Vec<u8>,
	chunk_count: u32,
}

impl ChunkAssembly {
	pub fn is_empty(&self) -> bool {
		self.msg_type.is_none()
	}

	pub fn reset(&mut self) {
		self.msg_type = None;
		self.body.clear();
		self.chunk_count = 0;
	}

	/// Accumulate one `Intermediate` chunk's body. Returns `false` if the chunk's type
	/// doesn't match the message already being assembled, or if a chunk/byte budget is
	/// exceeded.
	pub fn push_intermediate(&mut self, msg_type: MessageType, body: &[u8], max_chunk_count: u32, max_message_size: u32) -> Result<(), AssemblyError> {
		match self.msg_type {
			None => self.msg_type = Some(msg_type),
			Some(existing) if existing != msg_type => return Err(AssemblyError::TypeMismatch),
			Some(_) => {}
		}

		self.chunk_count += 1;
		if max_chunk_count != 0 && self.chunk_count > max_chunk_count {
			return Err(AssemblyError::TooManyChunks);
		}

		self.body.extend_from_slice(body);
		if max_message_size != 0 && self.body.len() as u64 > max_message_size as u64 {
			return Err(AssemblyError::TooLarge);
		}

		Ok(())
	}

	/// Complete assembly with a `Final` chunk's body, returning the whole logical message.
	pub fn finish(&mut self, msg_type: MessageType, body: &[u8], max_message_size: u32) -> Result<Vec<u8>, AssemblyError> {
		if let Some(existing) = self.msg_type {
			if existing != msg_type {
				self.reset();
				return Err(AssemblyError::TypeMismatch);
			}
		}

		let mut whole = core::mem::take(&mut self.body);
		whole.extend_from_slice(body);

		if max_message_size != 0 && whole.len() as u64 > max_message_size as u64 {
			self.reset();
			return Err(AssemblyError::TooLarge);
		}

		self.reset();
		Ok(whole)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyError {
	TypeMismatch,
	TooManyChunks,
	TooLarge,
}

/// One fully decoded logical message handed up to the connection FSM / services layer.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
	pub msg_type: MessageType,
	pub request_id: u32,
	pub body: Vec<u8>,
}
