use std::io::Write;

use sseprims::demo;
use sseprims_server::HandlerConfig;
use tokio::net::TcpListener;

use crate::cmd::{parse_duration, runtime, ServeArgs};
use crate::exit::{io_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let config = handler_config(&args)?;
    let router = demo::router(interval, config)
        .map_err(|err| CliError::new(INTERNAL, format!("demo setup failed: {err}")))?;

    runtime()?.block_on(async move {
        let listener = TcpListener::bind(&args.addr)
            .await
            .map_err(|err| io_error(&format!("bind {} failed", args.addr), err))?;
        let local = listener
            .local_addr()
            .map_err(|err| io_error("local address unavailable", err))?;

        tracing::info!(addr = %local, ?interval, "serving demo streams");
        println!("listening on http://{local}");
        let _ = std::io::stdout().flush();

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|err| io_error("server failed", err))?;
        Ok(SUCCESS)
    })
}

fn handler_config(args: &ServeArgs) -> CliResult<HandlerConfig> {
    let mut config = HandlerConfig::default();
    if let Some(keep_alive) = &args.keep_alive {
        config.keep_alive = Some(parse_duration(keep_alive)?);
    }
    if let Some(max) = args.max_body_size {
        config.max_body_size = max;
    }
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable; serving until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn args(keep_alive: Option<&str>, max_body_size: Option<usize>) -> ServeArgs {
        ServeArgs {
            addr: "127.0.0.1:0".to_string(),
            interval: "1s".to_string(),
            keep_alive: keep_alive.map(str::to_string),
            max_body_size,
        }
    }

    #[test]
    fn handler_config_applies_overrides() {
        let config = handler_config(&args(Some("15s"), Some(512))).unwrap();
        assert_eq!(config.keep_alive, Some(Duration::from_secs(15)));
        assert_eq!(config.max_body_size, 512);

        let defaults = handler_config(&args(None, None)).unwrap();
        assert_eq!(defaults.keep_alive, None);
        assert_eq!(defaults.max_body_size, HandlerConfig::default().max_body_size);
    }

    #[test]
    fn handler_config_rejects_bad_keep_alive() {
        assert!(handler_config(&args(Some("soon"), None)).is_err());
    }
}
