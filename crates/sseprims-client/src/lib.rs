//! Client side of the event-stream session protocol.
//!
//! [`StreamClient`] posts `{"input": ...}` to an endpoint and yields the
//! values the server emits, in order, as an [`EventStream`].
//! [`Subscription`] wraps a client for callers that want callbacks, a
//! "currently streaming" flag and the last error instead of a stream.

pub mod client;
pub mod error;
pub mod subscription;

pub use client::{ClientConfig, EventStream, StreamClient, DEFAULT_CONNECT_TIMEOUT};
pub use error::{ClientError, Result};
pub use subscription::{
    SubscribeOptions, SubscribeOutcome, Subscription, SubscriptionHandle, SubscriptionStatus,
};
pub use tokio_util::sync::CancellationToken;
