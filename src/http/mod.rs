//! HTTP protocol implementation.
//!
//! Static file serving over HTTP/1.1 with keep-alive and pipelined requests.
//!
//! # Architecture
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`connection`**: Per-client state driven by the reactor: socket, buffers, request and response
//! - **`parser`**: Incremental request parser working directly on the read buffer
//! - **`request`**: HTTP request representation
//! - **`response`**: Status line, headers and file/error body of a response
//! - **`writer`**: Vectored write of header text plus mapped file body
//! - **`mime`**: MIME type detection based on file extensions
//! - **`mmap`**: Read-only memory mapping of served files
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine. Every arrow out of
//! a state is taken on a worker thread after a one-shot epoll event:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request complete (or malformed → 400)
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send headers + mapped file
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → parse next buffered request, else Reading
//!               └─ Close → Closed
//! ```
//!
//! Idle timeouts and peer hang-ups move a connection to `Closed` from any
//! state.

pub mod connection;
pub mod mime;
pub mod mmap;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
