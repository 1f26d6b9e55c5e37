//! Event-driven server core.
//!
//! - **`epoller`**: owning wrapper over Linux epoll, plus an eventfd waker
//! - **`timer`**: indexed min-heap of idle deadlines
//! - **`pool`**: fixed-size worker thread pool
//! - **`listener`**: listening socket setup
//! - **`dispatch`**: worker-side read/process/write of one readiness event
//! - **`reactor`**: the event loop tying the above together

pub mod dispatch;
pub mod epoller;
pub mod listener;
pub mod pool;
pub mod reactor;
pub mod timer;
