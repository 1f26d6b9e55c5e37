//! Thin owning wrapper over Linux `epoll`.
//!
//! The [`Epoller`] only manages registrations; it holds no connection state.
//! Registration calls take `&self` and may be made from any thread (the
//! kernel serialises them). The event array lives in a separate [`Events`]
//! value owned by the thread that calls [`Epoller::wait`].

use std::io;
use std::os::fd::RawFd;

pub use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP};

/// Interest / readiness bit set, as understood by `epoll_ctl`.
pub type Interest = u32;

pub const READABLE: Interest = EPOLLIN as u32;
pub const WRITABLE: Interest = EPOLLOUT as u32;
pub const EDGE: Interest = EPOLLET as u32;
pub const ONESHOT: Interest = EPOLLONESHOT as u32;
pub const PEER_CLOSED: Interest = EPOLLRDHUP as u32;
pub const HANGUP: Interest = (EPOLLRDHUP | EPOLLHUP | EPOLLERR) as u32;

pub struct Epoller {
    fd: RawFd,
}

impl Epoller {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// Register `fd`; `token` is handed back verbatim with every event.
    pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Replace the interest set of a registered `fd`. This is also how a
    /// one-shot registration is re-armed.
    pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Remove `fd`. A descriptor that is not registered is not an error.
    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe { libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Wait for readiness. `-1` blocks indefinitely, `0` polls.
    ///
    /// An interrupted wait reports zero events.
    pub fn wait(&self, events: &mut Events, timeout_ms: i32) -> io::Result<usize> {
        let res = unsafe {
            libc::epoll_wait(
                self.fd,
                events.buf.as_mut_ptr(),
                events.buf.len() as libc::c_int,
                timeout_ms,
            )
        };
        if res < 0 {
            events.len = 0;
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(0);
            }
            return Err(err);
        }
        events.len = res as usize;
        Ok(events.len)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let mut event = libc::epoll_event {
            events: interest,
            u64: token,
        };
        if unsafe { libc::epoll_ctl(self.fd, op, fd, &mut event) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Epoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Event array filled by [`Epoller::wait`].
pub struct Events {
    buf: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    /// Number of events reported by the last wait.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn token(&self, i: usize) -> u64 {
        debug_assert!(i < self.len);
        self.buf[i].u64
    }

    pub fn mask(&self, i: usize) -> Interest {
        debug_assert!(i < self.len);
        self.buf[i].events
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Interest)> + '_ {
        self.buf[..self.len].iter().map(|e| (e.u64, e.events))
    }
}

/// An eventfd used to interrupt a blocked [`Epoller::wait`] from another
/// thread.
pub struct Waker {
    fd: RawFd,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        let res = unsafe {
            libc::write(self.fd, &one as *const u64 as *const libc::c_void, std::mem::size_of::<u64>())
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            // counter saturated: a wake-up is already pending
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Clear pending wake-ups.
    pub fn drain(&self) {
        let mut value: u64 = 0;
        unsafe {
            libc::read(self.fd, &mut value as *mut u64 as *mut libc::c_void, std::mem::size_of::<u64>());
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
