use std::time::Duration;

use axum::extract::Request;
use axum::routing::any;
use axum::Router;
use serde::Serialize;
use sseprims_schema::{InputValidator, Unvalidated};

use crate::handler::{HandlerConfig, StreamHandler};
use crate::producer::Producer;
use crate::session::ClosePolicy;

/// Start declaring a stream endpoint mounted at `route`.
pub fn source(route: impl Into<String>) -> SourceBuilder<Unvalidated> {
    SourceBuilder {
        route: route.into(),
        validator: Unvalidated,
        config: HandlerConfig::default(),
    }
}

/// Builder returned by [`source`].
#[derive(Debug, Clone)]
pub struct SourceBuilder<V> {
    route: String,
    validator: V,
    config: HandlerConfig,
}

impl<V: InputValidator> SourceBuilder<V> {
    /// Validate the request's `input` with `validator`.
    pub fn input<W: InputValidator>(self, validator: W) -> SourceBuilder<W> {
        SourceBuilder {
            route: self.route,
            validator,
            config: self.config,
        }
    }

    pub fn config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn close_policy(mut self, policy: ClosePolicy) -> Self {
        self.config.close_policy = policy;
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    pub fn keep_alive(mut self, period: Duration) -> Self {
        self.config.keep_alive = Some(period);
        self
    }

    /// Finish the endpoint with the producer that runs for each session.
    pub fn on_subscribe<T, P>(self, producer: P) -> StreamSource<V, P, T>
    where
        P: Producer<V::Input, T>,
        T: Serialize + 'static,
    {
        tracing::debug!(route = %self.route, "stream source defined");
        StreamSource {
            handler: StreamHandler::new(self.route, self.validator, producer, self.config),
        }
    }
}

/// A finished endpoint: one route, one validator, one producer.
#[derive(Debug)]
pub struct StreamSource<V, P, T> {
    handler: StreamHandler<V, P, T>,
}

impl<V, P, T> Clone for StreamSource<V, P, T> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<V, P, T> StreamSource<V, P, T>
where
    V: InputValidator,
    P: Producer<V::Input, T>,
    T: Serialize + 'static,
{
    pub fn route(&self) -> &str {
        self.handler.route()
    }

    pub fn handler(&self) -> &StreamHandler<V, P, T> {
        &self.handler
    }

    /// An axum router serving this endpoint for every method.
    ///
    /// GET and HEAD answer 405; merge several sources with [`Router::merge`].
    pub fn router(&self) -> Router {
        let handler = self.handler.clone();
        Router::new().route(
            self.handler.route(),
            any(move |request: Request| async move { handler.handle(request).await }),
        )
    }
}
