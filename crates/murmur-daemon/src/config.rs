//! Daemon configuration loaded from environment variables.
//!
//! Everything but the password has a default, so a first run only needs
//! `MURMUR_PASSWORD` and `MURMUR_USER_NAME`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use murmur_shared::constants::{DEFAULT_LISTEN_ADDR, DEFAULT_SOCKS_PROXY, SCHEDULER_TICK_SECS};

#[derive(Clone)]
pub struct DaemonConfig {
    /// Database file.
    /// Env: `MURMUR_DB`
    /// Default: `murmur.db` in the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Where the inbound listener binds; the onion service forwards here.
    /// Env: `MURMUR_LISTEN_ADDR`
    /// Default: `127.0.0.1:6060`
    pub listen_addr: SocketAddr,

    /// Proxy for outbound requests. Set the variable empty to connect
    /// directly.
    /// Env: `MURMUR_SOCKS_PROXY`
    /// Default: `socks5h://127.0.0.1:9050`
    pub socks_proxy: Option<String>,

    /// Our published address, handed to peers when introducing.
    /// Env: `MURMUR_ONION_ADDRESS`
    pub onion_address: Option<String>,

    /// Store password.
    /// Env: `MURMUR_PASSWORD`
    pub password: Option<String>,

    /// Name for the identity created on first run.
    /// Env: `MURMUR_USER_NAME`
    pub user_name: Option<String>,

    /// Scheduler period.
    /// Env: `MURMUR_TICK_SECS`
    /// Default: `10`
    pub tick: Duration,
}

// Hand-written so the password never reaches the logs.
impl std::fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("db_path", &self.db_path)
            .field("listen_addr", &self.listen_addr)
            .field("socks_proxy", &self.socks_proxy)
            .field("onion_address", &self.onion_address)
            .field("password", &self.password.as_ref().map(|_| "<set>"))
            .field("user_name", &self.user_name)
            .field("tick", &self.tick)
            .finish()
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            listen_addr: DEFAULT_LISTEN_ADDR,
            socks_proxy: Some(DEFAULT_SOCKS_PROXY.to_string()),
            onion_address: None,
            password: None,
            user_name: None,
            tick: Duration::from_secs(SCHEDULER_TICK_SECS),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = var("MURMUR_DB").filter(|p| !p.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(addr) = var("MURMUR_LISTEN_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.listen_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "invalid MURMUR_LISTEN_ADDR, using default"),
            }
        }

        if let Some(proxy) = var("MURMUR_SOCKS_PROXY") {
            let proxy = proxy.trim();
            config.socks_proxy = (!proxy.is_empty()).then(|| proxy.to_string());
        }

        config.onion_address = var("MURMUR_ONION_ADDRESS").filter(|a| !a.trim().is_empty());
        config.password = var("MURMUR_PASSWORD").filter(|p| !p.is_empty());
        config.user_name = var("MURMUR_USER_NAME").filter(|n| !n.trim().is_empty());

        if let Some(val) = var("MURMUR_TICK_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.tick = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "invalid MURMUR_TICK_SECS, using default"),
            }
        }

        config
    }
}
