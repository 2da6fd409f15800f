//! Server side of the event-stream session protocol.
//!
//! One request opens one session. The handler validates the request's
//! `input`, starts the caller's producer with a [`Subscriber`] handle, and
//! answers with a `text/event-stream` response that carries every emitted
//! value until the session closes.
//!
//! ```no_run
//! use sseprims_server::{source, Subscriber};
//! use sseprims_schema::typed;
//!
//! # async fn run() -> std::io::Result<()> {
//! let counter = source("/api/counter")
//!     .input(typed::<Option<u64>>())
//!     .on_subscribe(|sub: Subscriber<Option<u64>, u64>| async move {
//!         let mut count = sub.input().unwrap_or(0);
//!         sub.every(std::time::Duration::from_secs(1), move |sub| {
//!             sub.emit(&count);
//!             count += 1;
//!         })
//!     });
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, counter.router()).await
//! # }
//! ```

pub mod error;
pub mod handler;
pub mod producer;
pub mod session;
pub mod source;
pub mod teardown;

pub use error::{EmitError, ProducerFault, ServerError};
pub use handler::{HandlerConfig, StreamHandler, DEFAULT_MAX_BODY_SIZE};
pub use producer::{sync_producer, IntoOutcome, Producer, ProducerResult, SyncProducer};
pub use session::{ClosePolicy, SessionState, Subscriber};
pub use source::{source, SourceBuilder, StreamSource};
pub use teardown::Teardown;
