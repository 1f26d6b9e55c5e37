//! Worker-side handling of one readiness event.
//!
//! Connection sockets are registered one-shot, so after an event fires the
//! kernel reports nothing more for that socket until it is re-armed. Each
//! task therefore has the connection to itself: it runs the I/O, decides the
//! next interest and re-arms (or closes) while still holding the connection
//! lock. At most one task per connection is in flight at any time.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::http::connection::{ConnId, Connection};
use crate::server::epoller::{Epoller, Interest, READABLE, WRITABLE};
use crate::server::reactor::ReactorStats;

/// Table entry for a live connection, shared between the reactor and the
/// worker task currently serving it.
#[derive(Debug)]
pub struct ConnSlot {
    id: ConnId,
    conn: Mutex<Connection>,
    in_flight: AtomicUsize,
}

impl ConnSlot {
    pub fn new(conn: Connection) -> Self {
        Self {
            id: conn.id(),
            conn: Mutex::new(conn),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the connection waits for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Read,
    Write,
    Close,
}

pub struct Dispatcher {
    epoller: Arc<Epoller>,
    conn_interest: Interest,
    stats: Arc<ReactorStats>,
}

impl Dispatcher {
    pub fn new(epoller: Arc<Epoller>, conn_interest: Interest, stats: Arc<ReactorStats>) -> Self {
        Self {
            epoller,
            conn_interest,
            stats,
        }
    }

    /// Base interest of every connection registration.
    pub fn conn_interest(&self) -> Interest {
        self.conn_interest
    }

    pub fn on_readable(&self, slot: &ConnSlot) {
        self.run(slot, |conn| self.read(conn));
    }

    pub fn on_writable(&self, slot: &ConnSlot) {
        self.run(slot, |conn| self.write(conn));
    }

    fn run<F>(&self, slot: &ConnSlot, task: F)
    where
        F: FnOnce(&mut Connection) -> Next,
    {
        if slot.in_flight.fetch_add(1, Ordering::AcqRel) > 0 {
            self.stats.overlapping_tasks.fetch_add(1, Ordering::Relaxed);
            tracing::error!(fd = slot.id.fd, "overlapping tasks on one connection");
        }

        let mut conn = slot.lock();
        if conn.is_closed() {
            slot.in_flight.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        let next = task(&mut *conn);
        // the registration below may fire at once on another worker
        slot.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.apply(&mut *conn, next);
    }

    fn read(&self, conn: &mut Connection) -> Next {
        match conn.read() {
            Ok(0) => {
                tracing::debug!(fd = conn.fd(), "peer closed");
                Next::Close
            }
            Err(e) if e.kind() != io::ErrorKind::WouldBlock => {
                tracing::debug!(fd = conn.fd(), error = %e, "read failed");
                Next::Close
            }
            _ => self.process(conn),
        }
    }

    fn process(&self, conn: &mut Connection) -> Next {
        if conn.process() {
            Next::Write
        } else {
            Next::Read
        }
    }

    fn write(&self, conn: &mut Connection) -> Next {
        let written = conn.write();

        if conn.bytes_to_write() == 0 {
            return if conn.is_keep_alive() {
                self.process(conn)
            } else {
                Next::Close
            };
        }

        match written {
            Ok(_) => Next::Write,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Next::Write,
            Err(e) => {
                tracing::debug!(fd = conn.fd(), error = %e, "write failed");
                Next::Close
            }
        }
    }

    fn apply(&self, conn: &mut Connection, next: Next) {
        let interest = match next {
            Next::Read => READABLE,
            Next::Write => WRITABLE,
            Next::Close => {
                conn.close(&self.epoller);
                return;
            }
        };
        let id = conn.id();
        if let Err(e) = self
            .epoller
            .modify(id.fd, id.token(), self.conn_interest | interest)
        {
            tracing::warn!(fd = id.fd, error = %e, "failed to re-arm connection");
            conn.close(&self.epoller);
        }
    }
}
