//! lantern - event-driven static file HTTP server
//!
//! A single reactor thread multiplexes every socket through epoll and hands
//! request work to a fixed worker pool. Files are served straight from
//! memory-mapped pages with vectored writes.

pub mod buffer;
pub mod config;
pub mod http;
pub mod logging;
pub mod server;
