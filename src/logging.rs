use std::env;
use std::time::Instant;

use slog::o;
use slog::Drain;

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

lazy_static::lazy_static! {
    // The "base" logger that all modules should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level: slog::Level = env_or("LOG_LEVEL", "INFO")
                .parse()
                .unwrap_or(slog::Level::Info);
        let format = env_or("LOG_FORMAT", "json").to_lowercase();
        if format.trim() == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "music-dashboard"));
}

/// Logs one line per request with its status and duration.
#[derive(Debug, Default, Clone)]
pub struct LogMiddleware;

impl LogMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let method = req.method().to_string();
        let path = req.url().path().to_string();
        let start = Instant::now();
        let res = next.run(req).await;
        let status = res.status();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if status.is_server_error() {
            slog::error!(
                LOG, "request";
                "method" => method, "path" => path,
                "status" => u16::from(status), "elapsed_ms" => elapsed_ms,
            );
        } else if status.is_client_error() {
            slog::warn!(
                LOG, "request";
                "method" => method, "path" => path,
                "status" => u16::from(status), "elapsed_ms" => elapsed_ms,
            );
        } else {
            slog::info!(
                LOG, "request";
                "method" => method, "path" => path,
                "status" => u16::from(status), "elapsed_ms" => elapsed_ms,
            );
        }
        Ok(res)
    }
}
