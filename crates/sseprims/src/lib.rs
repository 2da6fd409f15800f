//! Typed server-to-client value streams over `text/event-stream`.
//!
//! A server declares a stream endpoint with a validated input and a
//! producer that emits values; a client posts the input and reads the
//! values back, in order, until the server closes the stream.
//!
//! # Crate Structure
//!
//! - [`frame`]: event-stream encoder and incremental decoder
//! - [`schema`]: input validation, including JSON Schema (behind `schema` feature)
//! - [`server`]: sessions, request handler and axum routing (behind `server` feature)
//! - [`client`]: typed reader and subscription binding (behind `client` feature)
//! - [`demo`]: the counter and countdown endpoints served by `sseprims serve`

/// Re-export frame types.
pub mod frame {
    pub use sseprims_frame::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use sseprims_schema::*;
}

/// Re-export server types (requires `server` feature).
#[cfg(feature = "server")]
pub mod server {
    pub use sseprims_server::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use sseprims_client::*;
}

#[cfg(feature = "server")]
pub mod demo;
