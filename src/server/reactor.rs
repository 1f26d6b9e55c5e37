//! The event loop.
//!
//! One thread owns the listener, the connection table and the idle timers.
//! It waits on epoll, accepts new clients, closes hung-up or idle ones, and
//! hands every read/write readiness to the worker pool. Workers re-arm the
//! socket themselves when they are done (see [`crate::server::dispatch`]).
//!
//! ```text
//!            ┌──────────────┐  readable/writable  ┌────────────┐
//!  epoll ───►│   Reactor    │────────────────────►│ WorkerPool │
//!            │ accept/close │                     │ read/write │
//!            │ idle timers  │◄─── epoll re-arm ───│  re-arm    │
//!            └──────────────┘                     └────────────┘
//! ```

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{Level, debug, error, info, warn};

use crate::config::{ServerConfig, TriggerMode};
use crate::http::connection::{ConnContext, ConnId, Connection};
use crate::logging;
use crate::server::dispatch::{ConnSlot, Dispatcher};
use crate::server::epoller::{
    EDGE, Epoller, Events, HANGUP, Interest, ONESHOT, PEER_CLOSED, READABLE, WRITABLE, Waker,
};
use crate::server::listener;
use crate::server::pool::WorkerPool;
use crate::server::timer::TimerManager;

const LISTENER_TOKEN: u64 = u64::MAX;
const WAKER_TOKEN: u64 = u64::MAX - 1;

/// Sent to a client that is turned away at capacity.
pub const BUSY_MESSAGE: &[u8] = b"Server busy!";

/// Registration masks `(listener, connection)` for a trigger mode.
///
/// Both always watch for peer half-close; connections are always one-shot.
pub fn event_masks(mode: TriggerMode) -> (Interest, Interest) {
    let mut listen = PEER_CLOSED;
    let mut conn = PEER_CLOSED | ONESHOT;
    if mode.listen_edge() {
        listen |= EDGE;
    }
    if mode.conn_edge() {
        conn |= EDGE;
    }
    (listen, conn)
}

/// Counters kept by the reactor and its workers.
#[derive(Debug, Default)]
pub struct ReactorStats {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub timed_out: AtomicU64,
    /// Tasks that started while another task for the same connection was
    /// still running. Stays zero while the one-shot discipline holds.
    pub overlapping_tasks: AtomicU64,
}

/// Point-in-time copy of [`ReactorStats`] plus the live connection count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub overlapping_tasks: u64,
    pub live_connections: usize,
}

/// Cloneable remote control for a running [`Reactor`].
#[derive(Clone)]
pub struct ReactorHandle {
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    stats: Arc<ReactorStats>,
    ctx: Arc<ConnContext>,
}

impl ReactorHandle {
    /// Ask the event loop to stop. It closes every connection, drains the
    /// worker pool and returns from [`Reactor::run`].
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            error!(error = %e, "failed to wake event loop");
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            overlapping_tasks: self.stats.overlapping_tasks.load(Ordering::Relaxed),
            live_connections: self.ctx.live(),
        }
    }
}

pub struct Reactor {
    listener: TcpListener,
    listen_edge: bool,
    idle_timeout: Option<Duration>,
    max_connections: usize,
    epoller: Arc<Epoller>,
    events: Events,
    waker: Arc<Waker>,
    timers: TimerManager<ConnId>,
    connections: HashMap<RawFd, Arc<ConnSlot>>,
    next_generation: u32,
    pool: WorkerPool,
    dispatcher: Arc<Dispatcher>,
    ctx: Arc<ConnContext>,
    stats: Arc<ReactorStats>,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    /// Bind the configured port and set up the event loop.
    pub fn new(cfg: &ServerConfig) -> anyhow::Result<Self> {
        let listener = listener::bind(cfg)?;
        Self::with_listener(cfg, listener)
    }

    /// Set up the event loop around an already bound listener. The port in
    /// `cfg` is ignored.
    pub fn with_listener(cfg: &ServerConfig, listener: TcpListener) -> anyhow::Result<Self> {
        anyhow::ensure!(cfg.max_connections > 0, "max_connections must be at least 1");
        listener
            .set_nonblocking(true)
            .context("failed to make listener non-blocking")?;

        let (listen_interest, conn_interest) = event_masks(cfg.trigger_mode);

        let epoller = Arc::new(Epoller::new().context("failed to create epoll instance")?);
        let waker = Arc::new(Waker::new().context("failed to create eventfd")?);
        epoller
            .add(listener.as_raw_fd(), LISTENER_TOKEN, listen_interest | READABLE)
            .context("failed to register listener")?;
        epoller
            .add(waker.fd(), WAKER_TOKEN, READABLE)
            .context("failed to register waker")?;

        let pool = WorkerPool::new(cfg.workers)?;
        let stats = Arc::new(ReactorStats::default());
        let ctx = Arc::new(ConnContext::new(cfg.root.clone(), cfg.trigger_mode.conn_edge()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&epoller),
            conn_interest,
            Arc::clone(&stats),
        ));

        let reactor = Self {
            listener,
            listen_edge: cfg.trigger_mode.listen_edge(),
            idle_timeout: cfg.idle_timeout(),
            max_connections: cfg.max_connections,
            epoller,
            events: Events::with_capacity(cfg.max_events),
            waker,
            timers: TimerManager::new(),
            connections: HashMap::new(),
            next_generation: 0,
            pool,
            dispatcher,
            ctx,
            stats,
            shutdown: Arc::new(AtomicBool::new(false)),
        };
        reactor.log_banner(cfg);
        Ok(reactor)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shutdown: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
            stats: Arc::clone(&self.stats),
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Run until [`ReactorHandle::shutdown`] is called.
    pub fn run(&mut self) -> anyhow::Result<()> {
        info!("========== Server start ==========");
        while !self.shutdown.load(Ordering::Acquire) {
            let timeout = self.poll_timeout();
            let n = self
                .epoller
                .wait(&mut self.events, timeout)
                .context("epoll_wait failed")?;

            for i in 0..n {
                let token = self.events.token(i);
                let mask = self.events.mask(i);
                self.dispatch(token, mask);
            }
            self.sweep_timers();
        }

        self.close_all();
        info!("========== Server stop ==========");
        Ok(())
    }

    fn dispatch(&mut self, token: u64, mask: Interest) {
        match token {
            LISTENER_TOKEN => self.accept_all(),
            WAKER_TOKEN => self.waker.drain(),
            _ => {
                let id = ConnId::from_token(token);
                let Some(slot) = self.lookup(id) else {
                    debug!(fd = id.fd, generation = id.generation, "stale event dropped");
                    return;
                };

                if mask & HANGUP != 0 {
                    self.close_connection(&slot);
                } else if mask & READABLE != 0 {
                    self.extend_timer(id);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    self.pool.submit(move || dispatcher.on_readable(&slot));
                } else if mask & WRITABLE != 0 {
                    self.extend_timer(id);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    self.pool.submit(move || dispatcher.on_writable(&slot));
                } else {
                    error!(fd = id.fd, mask, "unexpected event");
                }
            }
        }
    }

    fn lookup(&self, id: ConnId) -> Option<Arc<ConnSlot>> {
        self.connections
            .get(&id.fd)
            .filter(|slot| slot.id() == id)
            .cloned()
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.add_connection(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
            if !self.listen_edge {
                return;
            }
        }
    }

    fn add_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.ctx.live() >= self.max_connections {
            reject(stream, peer);
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(peer = %peer, error = %e, "failed to make client socket non-blocking");
            return;
        }

        self.next_generation = self.next_generation.wrapping_add(1);
        let id = ConnId::new(stream.as_raw_fd(), self.next_generation);
        let slot = Arc::new(ConnSlot::new(Connection::new(
            id,
            stream,
            peer,
            Arc::clone(&self.ctx),
        )));

        if let Some(timeout) = self.idle_timeout {
            self.timers.add(id.fd, timeout, id);
        }
        let interest = self.dispatcher.conn_interest() | READABLE;
        if let Err(e) = self.epoller.add(id.fd, id.token(), interest) {
            warn!(fd = id.fd, error = %e, "failed to register client");
            self.timers.cancel(id.fd);
            slot.lock().close(&self.epoller);
            return;
        }

        // replaces any closed entry left behind for a reused fd
        self.connections.insert(id.fd, slot);
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn extend_timer(&mut self, id: ConnId) {
        if let Some(timeout) = self.idle_timeout {
            self.timers.update(id.fd, timeout);
        }
    }

    fn close_connection(&mut self, slot: &ConnSlot) {
        let fd = slot.id().fd;
        self.timers.cancel(fd);
        self.connections.remove(&fd);
        slot.lock().close(&self.epoller);
    }

    /// Close connections whose idle deadline has passed.
    fn sweep_timers(&mut self) {
        if self.timers.is_empty() {
            return;
        }
        let mut expired = Vec::new();
        self.timers
            .pop_expired(Instant::now(), |_, id| expired.push(id));

        for id in expired {
            let Some(slot) = self.lookup(id) else {
                continue;
            };
            self.connections.remove(&id.fd);
            let mut conn = slot.lock();
            if !conn.is_closed() {
                info!(fd = id.fd, peer = %conn.peer(), "idle timeout");
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                conn.close(&self.epoller);
            }
        }
    }

    /// Expire due timers, then compute how long the next wait may block.
    fn poll_timeout(&mut self) -> i32 {
        self.sweep_timers();
        match self.timers.next_deadline(Instant::now()) {
            None => -1,
            Some(wait) => {
                let ms = wait.as_nanos().div_ceil(1_000_000);
                i32::try_from(ms).unwrap_or(i32::MAX)
            }
        }
    }

    fn close_all(&mut self) {
        for (_, slot) in self.connections.drain() {
            slot.lock().close(&self.epoller);
        }
        self.timers.clear();
        self.pool.shutdown();
    }

    fn log_banner(&self, cfg: &ServerConfig) {
        if !logging::is_enabled(Level::INFO) {
            return;
        }
        let (listen, conn) = event_masks(cfg.trigger_mode);
        info!(port = cfg.port, linger = cfg.linger, "========== Server init ==========");
        info!(
            listen = if listen & EDGE != 0 { "ET" } else { "LT" },
            conn = if conn & EDGE != 0 { "ET" } else { "LT" },
            "listen mode / open conn mode"
        );
        info!(root = %cfg.root.display(), "document root");
        info!(workers = self.pool.size(), max_connections = cfg.max_connections, "worker pool");
        match self.idle_timeout {
            Some(timeout) => info!(ms = timeout.as_millis() as u64, "idle timeout"),
            None => info!("idle timeout disabled"),
        }
    }
}

/// Turn away a client at capacity. The message is best effort.
fn reject(mut stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.write(BUSY_MESSAGE) {
        debug!(peer = %peer, error = %e, "failed to send busy message");
    }
    warn!(peer = %peer, "clients are full, connection rejected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_follow_trigger_mode() {
        let (listen, conn) = event_masks(TriggerMode::Level);
        assert_eq!(listen & EDGE, 0);
        assert_eq!(conn & EDGE, 0);
        assert_ne!(conn & ONESHOT, 0);

        let (listen, conn) = event_masks(TriggerMode::ConnEdge);
        assert_eq!(listen & EDGE, 0);
        assert_ne!(conn & EDGE, 0);

        let (listen, conn) = event_masks(TriggerMode::ListenEdge);
        assert_ne!(listen & EDGE, 0);
        assert_eq!(conn & EDGE, 0);

        let (listen, conn) = event_masks(TriggerMode::Edge);
        assert_ne!(listen & EDGE, 0);
        assert_ne!(conn & EDGE, 0);
        assert_eq!(listen & ONESHOT, 0);
        assert_ne!(listen & PEER_CLOSED, 0);
    }
}
