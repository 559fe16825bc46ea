//! Quill Coordinator
//!
//! Connection multiplexer in front of the generation worker: accepts client
//! connections, forwards their requests over the request channel and routes
//! each result back to the connection that asked for it.

pub mod metrics_server;
pub mod multiplexer;
pub mod registry;
pub mod router;

pub use multiplexer::Multiplexer;
pub use registry::{ConnectionGuard, ConnectionRegistry};
pub use router::ResultRouter;
