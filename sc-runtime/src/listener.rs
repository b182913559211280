use std::net::{SocketAddr, TcpListener, TcpStream};

use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;
use stakker::Fwd;

use crate::sys::{self, RawFd};

pub(crate) struct AcceptorEntry {
	listener: TcpListener,
	fwd: Fwd<(TcpStream, SocketAddr)>,
}

impl AcceptorEntry {
	pub(crate) fn flush_accept(&mut self, _fd: RawFd) -> Result {
		loop {
			match self.listener.accept() {
				Ok((stream, addr)) => {
					if let Err(err) = stream.set_nonblocking(true) {
						log::warn!("Failed to mark accepted socket non-blocking: {err}");
						continue;
					}

					self.fwd.fwd((stream, addr));
				}
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
				Err(err) => return Err(fail!(StatusCode::BadTcpInternalError, "accept() failed: {err}")),
			}
		}
	}
}

/// A non-blocking TCP listener registered with the reactor. Every accepted connection is
/// forwarded to `fwd`; the endpoint listener FSM is responsible for turning each one into
/// a fresh secure connection.
pub struct Listener {
	fd: RawFd,
}

impl Listener {
	pub fn bind(addr: SocketAddr, fwd: Fwd<(TcpStream, SocketAddr)>) -> Result<Self> {
		let listener = TcpListener::bind(addr).map_err(|err| fail!(StatusCode::BadTcpInternalError, "Failed to bind listener on {addr}: {err}"))?;

		listener
			.set_nonblocking(true)
			.map_err(|err| fail!(StatusCode::BadTcpInternalError, "Failed to mark listener non-blocking: {err}"))?;

		let fd = sys::as_raw(&listener);
		crate::register_acceptor(fd, AcceptorEntry { listener, fwd });

		Ok(Self { fd })
	}
}

impl Drop for Listener {
	fn drop(&mut self) {
		crate::unregister_fd(self.fd);
	}
}
