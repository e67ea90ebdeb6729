use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use flotg_ingest::ProviderProfile;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub queue_backlog: usize,
    pub submit_timeout: Duration,
    /// Upper bound on one query call, on top of `submit_timeout`.
    pub rpc_wait: Duration,
    /// Directory holding `server-cert.pem`, `server-key.pem` and `ca-cert.pem`.
    pub tls_authority: PathBuf,
    pub event_feed: Option<PathBuf>,
    pub profile: ProviderProfile,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let port: u16 = get("FLOTG_PORT")
            .ok_or_else(|| anyhow!("FLOTG_PORT is not set"))?
            .parse()
            .context("FLOTG_PORT must be a port number")?;
        let queue_backlog: usize = match get("FLOTG_QUEUE_BACKLOG") {
            Some(v) => v.parse().context("FLOTG_QUEUE_BACKLOG must be a positive integer")?,
            None => 256,
        };
        if queue_backlog == 0 {
            return Err(anyhow!("FLOTG_QUEUE_BACKLOG must be a positive integer"));
        }
        let submit_timeout_secs: u64 = match get("FLOTG_SUBMIT_TIMEOUT_SECS") {
            Some(v) => v.parse().context("FLOTG_SUBMIT_TIMEOUT_SECS must be a whole number of seconds")?,
            None => 5,
        };
        let rpc_wait_secs: u64 = match get("FLOTG_RPC_WAIT_SECS") {
            Some(v) => v.parse().context("FLOTG_RPC_WAIT_SECS must be a whole number of seconds")?,
            None => 30,
        };
        if rpc_wait_secs == 0 {
            return Err(anyhow!("FLOTG_RPC_WAIT_SECS must be at least one second"));
        }
        let tls_authority: PathBuf = get("TLS_AUTHORITY")
            .ok_or_else(|| anyhow!("TLS_AUTHORITY is not set"))?
            .into();

        let mut profile = ProviderProfile::telegram();
        if let Some(prefix) = get("FLOTG_UID_PREFIX") {
            profile.uid_prefix = prefix;
        }
        if let Some(base) = get("FLOTG_LINK_BASE") {
            profile.link_base = base;
        }

        Ok(Self {
            host: get("FLOTG_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("FLOTG_DB_PATH").unwrap_or_else(|| "flo_tg.db".into()).into(),
            queue_backlog,
            submit_timeout: Duration::from_secs(submit_timeout_secs),
            rpc_wait: Duration::from_secs(rpc_wait_secs),
            tls_authority,
            event_feed: get("FLOTG_EVENT_FEED").map(PathBuf::from),
            profile,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_fill_everything_but_port_and_tls() {
        let config = load(&[("FLOTG_PORT", "7400"), ("TLS_AUTHORITY", "/etc/flotg/tls")]).unwrap();
        assert_eq!(config.port, 7400);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.db_path, PathBuf::from("flo_tg.db"));
        assert_eq!(config.queue_backlog, 256);
        assert_eq!(config.submit_timeout, Duration::from_secs(5));
        assert_eq!(config.rpc_wait, Duration::from_secs(30));
        assert_eq!(config.event_feed, None);
        assert_eq!(config.profile, ProviderProfile::telegram());
        assert_eq!(config.bind_addr().unwrap(), "0.0.0.0:7400".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("FLOTG_PORT", "7400"),
            ("TLS_AUTHORITY", "/tls"),
            ("FLOTG_HOST", "127.0.0.1"),
            ("FLOTG_QUEUE_BACKLOG", "8"),
            ("FLOTG_SUBMIT_TIMEOUT_SECS", "1"),
            ("FLOTG_RPC_WAIT_SECS", "3"),
            ("FLOTG_EVENT_FEED", "/var/lib/flotg/events.jsonl"),
            ("FLOTG_LINK_BASE", "https://provider"),
        ])
        .unwrap();
        assert_eq!(config.queue_backlog, 8);
        assert_eq!(config.submit_timeout, Duration::from_secs(1));
        assert_eq!(config.rpc_wait, Duration::from_secs(3));
        assert_eq!(config.event_feed, Some(PathBuf::from("/var/lib/flotg/events.jsonl")));
        assert_eq!(config.profile.link_base, "https://provider");
        assert_eq!(config.profile.uid_prefix, "tg");
    }

    #[test]
    fn missing_or_malformed_values_fail_startup() {
        assert!(load(&[("TLS_AUTHORITY", "/tls")]).is_err());
        assert!(load(&[("FLOTG_PORT", "7400")]).is_err());
        assert!(load(&[("FLOTG_PORT", "http"), ("TLS_AUTHORITY", "/tls")]).is_err());
        assert!(load(&[("FLOTG_PORT", "7400"), ("TLS_AUTHORITY", "/tls"), ("FLOTG_QUEUE_BACKLOG", "0")]).is_err());
        assert!(
            load(&[("FLOTG_PORT", "7400"), ("TLS_AUTHORITY", "/tls"), ("FLOTG_SUBMIT_TIMEOUT_SECS", "soon")]).is_err()
        );
        assert!(load(&[("FLOTG_PORT", "7400"), ("TLS_AUTHORITY", "/tls"), ("FLOTG_RPC_WAIT_SECS", "0")]).is_err());
    }
}
