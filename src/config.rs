use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;

use crate::cli::ServeArgs;
use crate::processor::ProcessorSettings;
use crate::retry::RetryConfig;

/// Validated settings for `megadl serve`.
pub struct Config {
    pub database: PathBuf,
    pub destination: PathBuf,
    pub gateway: String,
    pub worker_id: String,
    pub cors_origin: Option<HeaderValue>,
    pub listen: SocketAddr,
    pub idle_delay: Duration,
    pub error_backoff: Duration,
    pub incomplete_retry_delay: Duration,
    pub progress_interval: Duration,
    pub retry: RetryConfig,
    pub notify_systemd: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database", &self.database)
            .field("destination", &self.destination)
            .field("gateway", &self.gateway)
            .field("worker_id", &self.worker_id)
            .field("listen", &self.listen)
            .finish_non_exhaustive()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Short random identifier for this process.
fn random_worker_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}

impl Config {
    pub fn from_args(database: &str, args: ServeArgs) -> anyhow::Result<Self> {
        let listen: SocketAddr = args
            .listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", args.listen))?;

        let gateway = args.gateway.trim().to_string();
        if !(gateway.starts_with("http://") || gateway.starts_with("https://")) {
            anyhow::bail!("Gateway must be an http(s) URL, got {:?}", gateway);
        }

        let cors_origin = args
            .cors_domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(|d| {
                HeaderValue::from_str(d).with_context(|| format!("Invalid CORS domain: {d}"))
            })
            .transpose()?;

        let worker_id = args
            .worker_id
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .unwrap_or_else(random_worker_id);

        Ok(Self {
            database: expand_tilde(database),
            destination: expand_tilde(&args.destination),
            gateway,
            worker_id,
            cors_origin,
            listen,
            idle_delay: Duration::from_millis(args.idle_delay_ms),
            error_backoff: Duration::from_millis(args.error_backoff_ms),
            incomplete_retry_delay: Duration::from_secs(args.incomplete_retry_secs),
            progress_interval: Duration::from_millis(args.progress_interval_ms),
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay_secs: args.retry_delay,
                max_delay_secs: 60,
            },
            notify_systemd: args.notify_systemd,
        })
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            destination: self.destination.clone(),
            worker_id: self.worker_id.clone(),
            idle_delay: self.idle_delay,
            error_backoff: self.error_backoff,
            incomplete_retry_delay: self.incomplete_retry_delay,
        }
    }

    /// Lock file guarding the database against a second daemon.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.database.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }
}
