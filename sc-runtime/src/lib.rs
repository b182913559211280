extern crate alloc;

use alloc::collections::VecDeque;
use core::cell::RefCell;
use core::time::Duration;
use std::io::{self, ErrorKind};

use bytes::BytesMut;
use sc_utils::error::Result;
use sc_utils::fail;
use sc_utils::status::StatusCode;
use stakker::Fwd;

mod listener;
mod rt;
pub mod time;

pub use listener::Listener;
pub use rt::*;

#[cfg(target_family = "unix")]
mod sys {
	pub use libc::{c_void as BufType, poll, pollfd as Poll, recv, send, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};
	pub use std::os::fd::{AsRawFd, RawFd};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use u8 as BufType;
	pub use windows_sys::Win32::Networking::WinSock::{
		recv, send, WSAPoll as poll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll,
	};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_socket() as _
	}
}

pub use sys::AsRawFd;
use sys::*;

/// Size of each non-blocking `recv()` call. The chunk engine reassembles messages out of
/// whatever the OS hands back, so this is a throughput knob, not a protocol constant.
const READ_CHUNK: usize = 8192;

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

fn ret_to_err(val: isize) -> Result<Option<usize>> {
	match TryInto::<usize>::try_into(val) {
		Ok(n) => Ok(Some(n)),
		Err(_) => {
			let err = io::Error::last_os_error();

			if matches!(err.kind(), ErrorKind::WouldBlock) {
				return Ok(None);
			}

			Err(fail!(StatusCode::BadTcpInternalError, "I/O operation failed: {err}"))
		}
	}
}

fn send(fd: RawFd, buf: &[u8]) -> Result<bool> {
	let r = unsafe { sys::send(fd, buf.as_ptr() as *mut BufType, buf.len() as _, 0) };

	if let Some(n) = ret_to_err(r as _)? {
		if n != buf.len() {
			return Err(fail!(StatusCode::BadTcpInternalError, "Only sent {}/{} bytes to socket", n, buf.len()));
		}

		Ok(true)
	} else {
		Ok(false)
	}
}

fn recv(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>> {
	let r = unsafe { sys::recv(fd, buf.as_mut_ptr() as *mut BufType, buf.len() as _, 0) };
	ret_to_err(r as _)
}

thread_local! {
	static GLOBAL: RefCell<State> = const {
		RefCell::new(State {
			fds: Vec::new(),
			entries: Vec::new(),
		})
	};
}

struct State {
	fds: Vec<Poll>,
	entries: Vec<Entry>,
}

impl State {
	fn with<X, F: FnOnce(&mut Self) -> X>(f: F) -> X {
		GLOBAL.with(|x| f(&mut x.borrow_mut()))
	}

	fn idx_of_fd(&mut self, fd: RawFd) -> usize {
		self.fds.iter().position(|f| f.fd == fd).expect("fd is registered")
	}

	/// Returns whether any more I/O is waiting.
	fn is_io(&self) -> bool {
		!self.fds.is_empty()
	}

	/// Poll the fds. Returns whether any file descriptors are ready for I/O.
	fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
		if self.fds.is_empty() {
			return Ok(false);
		}

		let ret = unsafe {
			poll(
				self.fds.as_mut_ptr(),
				self.fds.len().try_into().expect("Fewer than u32::MAX fds"),
				as_timeout(timeout),
			)
		};

		let mut pending: u32 = ret.try_into().map_err(|_| fail!(StatusCode::BadTcpInternalError, "poll() failed: {}", io::Error::last_os_error()))?;

		if pending == 0 {
			return Ok(false);
		}

		for idx in 0..self.fds.len() {
			let Poll { fd, events, revents } = &mut self.fds[idx];
			let entry = &mut self.entries[idx];

			if *revents == 0 {
				continue;
			}

			if *revents & (POLLERR | POLLHUP | POLLNVAL) != 0 {
				entry.flush_error();
			} else {
				if *revents & POLLIN != 0 {
					entry.flush_read(*fd)?;
				}

				if *revents & POLLOUT != 0 {
					entry.flush_write(*fd)?;
				};
			}

			*events = POLLIN;

			if entry.writable_wanted() {
				*events |= POLLOUT;
			}

			*revents = 0;

			pending -= 1;

			if pending == 0 {
				break;
			}
		}

		Ok(true)
	}
}

enum Entry {
	Stream { fwd: Fwd<BytesMut>, queue: VecDeque<Box<[u8]>>, failure: Fwd<()> },
	Acceptor(listener::AcceptorEntry),
}

impl Entry {
	fn flush_read(&mut self, fd: RawFd) -> Result {
		match self {
			Entry::Stream { fwd, failure, .. } => {
				loop {
					let mut buf = BytesMut::zeroed(READ_CHUNK);

					match recv(fd, &mut buf) {
						Ok(Some(0)) => {
							// Peer performed an orderly shutdown.
							failure.fwd(());
							return Ok(());
						}
						Ok(Some(n)) => {
							buf.truncate(n);
							fwd.fwd(buf);

							if n < READ_CHUNK {
								break;
							}
						}
						Ok(None) => break,
						Err(_) => {
							failure.fwd(());
							return Ok(());
						}
					}
				}

				Ok(())
			}
			Entry::Acceptor(a) => a.flush_accept(fd),
		}
	}

	fn flush_write(&mut self, fd: RawFd) -> Result {
		let Entry::Stream { queue, failure, .. } = self else { return Ok(()) };

		loop {
			let Some(buf) = queue.back() else { return Ok(()) };

			match send(fd, buf) {
				Ok(true) => {
					queue.pop_back();
				}
				Ok(false) => return Ok(()),
				Err(_) => {
					failure.fwd(());
					return Ok(());
				}
			}
		}
	}

	fn writable_wanted(&self) -> bool {
		match self {
			Entry::Stream { queue, .. } => !queue.is_empty(),
			Entry::Acceptor(_) => false,
		}
	}

	fn flush_error(&mut self) {
		if let Entry::Stream { failure, .. } = self {
			failure.fwd(());
		}
	}
}

/// A non-blocking TCP stream registered with the reactor. Bytes read from the socket are
/// forwarded to `fwd` as they arrive (in whatever chunking the OS hands back — the
/// secure-channel chunk engine is responsible for framing), and writes that would block
/// are queued and retried the next time the socket is writable.
pub struct Io<T: AsRawFd> {
	inner: T,
}

impl<T: AsRawFd> Io<T> {
	pub fn new(inner: T, fwd: Fwd<BytesMut>, failure: Fwd<()>) -> Self {
		State::with(|i| {
			i.fds.push(Poll { fd: as_raw(&inner), events: POLLIN, revents: 0 });
			i.entries.push(Entry::Stream { fwd, queue: VecDeque::new(), failure });
		});

		Self { inner }
	}

	/// Send `buf` on the socket, queueing it for later delivery if the socket is not
	/// currently writable. Chunks are always handed over as complete, already-framed
	/// byte buffers — there is no partial-message write API at this layer.
	pub fn write(&self, buf: &[u8]) -> Result {
		if !send(as_raw(&self.inner), buf)? {
			State::with(|i| {
				let idx = i.idx_of_fd(as_raw(&self.inner));

				let Entry::Stream { queue, .. } = &mut i.entries[idx] else { unreachable!() };
				queue.push_front(buf.to_vec().into_boxed_slice());

				i.fds[idx].events |= POLLOUT;
			});
		}

		Ok(())
	}
}

impl<T: AsRawFd> Drop for Io<T> {
	fn drop(&mut self) {
		State::with(|i| {
			let fd = as_raw(&self.inner);
			let idx = i.idx_of_fd(fd);
			i.entries.swap_remove(idx);
			i.fds.swap_remove(idx);
		})
	}
}

pub(crate) fn is_io() -> bool {
	State::with(State::is_io)
}

pub(crate) fn poll(timeout: Option<Duration>) -> Result<bool> {
	State::with(|i| i.poll(timeout))
}

pub(crate) fn register_acceptor(fd: RawFd, entry: listener::AcceptorEntry) {
	State::with(|i| {
		i.fds.push(Poll { fd, events: POLLIN, revents: 0 });
		i.entries.push(Entry::Acceptor(entry));
	});
}

pub(crate) fn unregister_fd(fd: RawFd) {
	State::with(|i| {
		if let Some(idx) = i.fds.iter().position(|f| f.fd == fd) {
			i.entries.swap_remove(idx);
			i.fds.swap_remove(idx);
		}
	});
}
