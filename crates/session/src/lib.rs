//! One-call transfers over an Endpoint bridge.
//!
//! [`EndpointSession`] wraps the chunk engine for the common cases: upload a
//! new file, update one, download one, each from or to a local file or an
//! in-memory buffer. It also hands out entry handlers and owns the event
//! registry for its bridge.

pub mod config;
pub mod session;

pub use config::{ConfigError, TransferConfig};
pub use session::{EndpointSession, TransferOptions};
