//! Demo endpoints: a counter and a countdown.

use std::time::Duration;

use axum::Router;
use serde_json::json;
use sseprims_schema::{typed, InputValidatorExt, JsonSchemaValidator};
use sseprims_server::{source, HandlerConfig, Subscriber};

pub const COUNTER_ROUTE: &str = "/api/counter";
pub const COUNTDOWN_ROUTE: &str = "/api/countdown";

/// Starting value when a countdown request carries no input.
pub const DEFAULT_COUNTDOWN: u64 = 10;

/// Emits `start, start + 1, ...` every `interval` until the client leaves.
///
/// Input is an optional start value, defaulting to 0.
pub fn counter(interval: Duration, config: HandlerConfig) -> Router {
    source(COUNTER_ROUTE)
        .config(config)
        .input(typed::<Option<u64>>())
        .on_subscribe(move |sub: Subscriber<Option<u64>, u64>| async move {
            let mut count = sub.input().unwrap_or(0);
            sub.every(interval, move |sub| {
                sub.emit(&count);
                count += 1;
            })
        })
        .router()
}

/// Emits `n, n - 1, ..., 0` every `interval`, then closes.
///
/// Input must be an integer of at least 1; missing input counts down
/// from [`DEFAULT_COUNTDOWN`].
pub fn countdown(interval: Duration, config: HandlerConfig) -> sseprims_schema::Result<Router> {
    let validator = JsonSchemaValidator::<u64>::new(&json!({
        "type": "integer",
        "minimum": 1
    }))?
    .with_default(json!(DEFAULT_COUNTDOWN));

    Ok(source(COUNTDOWN_ROUTE)
        .config(config)
        .input(validator)
        .on_subscribe(move |sub: Subscriber<u64, u64>| async move {
            let mut current = *sub.input();
            sub.every(interval, move |sub| {
                sub.emit(&current);
                match current.checked_sub(1) {
                    Some(next) => current = next,
                    None => sub.close(),
                }
            })
        })
        .router())
}

/// Both demo endpoints on one router.
pub fn router(interval: Duration, config: HandlerConfig) -> sseprims_schema::Result<Router> {
    Ok(counter(interval, config.clone()).merge(countdown(interval, config)?))
}
