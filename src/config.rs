//! Server configuration, read from flags or `GUESTCAP_*` environment variables

use crate::ratelimit::RateLimitPolicy;
use crate::session::ServiceSettings;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "guestcap-server", about = "Event photo upload session service")]
pub struct ServerConfig {
    #[arg(long, env = "GUESTCAP_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "GUESTCAP_PORT", default_value_t = 3000)]
    pub port: u16,

    /// SQLite URL, e.g. `sqlite://guestcap.db`
    #[arg(long, env = "GUESTCAP_DATABASE_URL", default_value = "sqlite://guestcap.db")]
    pub database_url: String,

    /// Base URL of the object storage service
    #[arg(long, env = "GUESTCAP_STORAGE_URL", default_value = "http://localhost:54321")]
    pub storage_url: String,

    #[arg(long, env = "GUESTCAP_STORAGE_BUCKET", default_value = "event-photos")]
    pub storage_bucket: String,

    /// Secret shared with storage for signing upload URLs
    #[arg(long, env = "GUESTCAP_SIGNING_SECRET", hide_env_values = true)]
    pub signing_secret: String,

    #[arg(long, env = "GUESTCAP_UPLOAD_URL_TTL_SECS", default_value_t = 900)]
    pub upload_url_ttl_secs: u64,

    /// Storage limit for events without their own
    #[arg(long, env = "GUESTCAP_DEFAULT_LIMIT_MB", default_value_t = 10240.0)]
    pub default_limit_mb: f64,

    /// Files each guest may submit per hour
    #[arg(long, env = "GUESTCAP_UPLOAD_RATE_LIMIT", default_value_t = 300)]
    pub upload_rate_limit: u32,

    /// Serve Prometheus metrics on their own listener instead of `/metrics`
    #[arg(long, env = "GUESTCAP_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn service_settings(&self) -> ServiceSettings {
        let uploads = RateLimitPolicy::uploads();

        ServiceSettings {
            default_limit_mb: self.default_limit_mb,
            upload_url_ttl: Duration::from_secs(self.upload_url_ttl_secs),
            upload_policy: RateLimitPolicy::new(uploads.prefix, self.upload_rate_limit, uploads.window),
            api_policy: RateLimitPolicy::api(),
        }
    }
}
