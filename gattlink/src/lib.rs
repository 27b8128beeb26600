//! LE Attribute Protocol channel setup and a single-threaded readiness loop.
//!
//! - [`connector`]: opens an L2CAP socket on the ATT fixed channel (bind,
//!   security level, blocking connect) and yields a [`Channel`].
//! - [`event_loop`]: registers descriptors with an interest mask, a callback
//!   and an optional destructor, and dispatches readiness until stopped.
//! - [`console`]: newline-delimited standard-input handling on top of the
//!   loop.
//! - [`client`]: the session that ties them together for `gattlink-client`.

pub mod adapter;
pub mod client;
pub mod config;
pub mod connector;
pub mod console;
pub mod event_loop;
pub mod net;
pub mod trace;

pub use connector::{Channel, ConnectError, ConnectParams, Connector};
pub use event_loop::{EventLoop, Interest, LoopContext, LoopError, Readiness};
pub use trace::init_tracing;
