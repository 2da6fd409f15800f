use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sseprims_client::StreamClient;
use tokio_util::sync::CancellationToken;

use crate::cmd::{parse_duration, runtime, SubscribeArgs};
use crate::exit::{client_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_value, OutputFormat};

pub fn run(args: SubscribeArgs, format: OutputFormat) -> CliResult<i32> {
    let input = parse_input(args.json.as_deref())?;
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let client = StreamClient::<Value, Value>::new(args.url.as_str())
        .map_err(|err| client_error("client setup failed", err))?;

    runtime()?.block_on(async move {
        let cancel = CancellationToken::new();
        watch_ctrl_c(cancel.clone());
        let timed_out = timeout.map(|limit| cancel_after(limit, cancel.clone()));

        let mut events = client
            .open(input.as_ref(), Some(cancel.clone()))
            .await
            .map_err(|err| client_error("subscribe failed", err))?;

        let mut received = 0usize;
        while let Some(item) = events.next().await {
            let value = item.map_err(|err| client_error("stream failed", err))?;
            print_value(&value, received, client.url(), format);
            received += 1;
            if args.count.is_some_and(|count| received >= count) {
                return Ok(SUCCESS);
            }
        }

        if timed_out.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            return Err(CliError::new(
                TIMEOUT,
                format!("timed out after {received} value(s)"),
            ));
        }
        tracing::debug!(received, cancelled = events.is_cancelled(), "stream ended");
        Ok(SUCCESS)
    })
}

fn parse_input(raw: Option<&str>) -> CliResult<Option<Value>> {
    raw.map(|json| {
        serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))
    })
    .transpose()
}

fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted; closing stream");
            cancel.cancel();
        }
    });
}

fn cancel_after(limit: Duration, cancel: CancellationToken) -> Arc<AtomicBool> {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                flag.store(true, Ordering::SeqCst);
                cancel.cancel();
            }
        }
    });
    fired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_must_be_json() {
        assert_eq!(parse_input(None).unwrap(), None);
        assert_eq!(parse_input(Some("5")).unwrap(), Some(Value::from(5)));
        assert_eq!(parse_input(Some("{nope")).unwrap_err().code, USAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_sets_flag_and_cancels() {
        let cancel = CancellationToken::new();
        let fired = cancel_after(Duration::from_millis(50), cancel.clone());
        cancel.cancelled().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_after_stays_quiet_when_cancelled_first() {
        let cancel = CancellationToken::new();
        let fired = cancel_after(Duration::from_secs(60), cancel.clone());
        cancel.cancel();
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
