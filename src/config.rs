use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_FILE: &str = "coaching-center.db";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_API_URL: &str = "http://localhost:3001";
const SEED_FILE_NAME: &str = "seed_data.json";

/// Settings for `coach-server`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_file: PathBuf,
    pub seed_file: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match get("PORT").filter(|v| !v.trim().is_empty()) {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got {:?}", v))?,
            None => DEFAULT_PORT,
        };
        let host = get("HOST")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let database_file = database_file_from(&get);
        let seed_file = match get("SEED_FILE").filter(|v| !v.trim().is_empty()) {
            Some(v) => PathBuf::from(v),
            None => database_file
                .parent()
                .map(|p| p.join(SEED_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(SEED_FILE_NAME)),
        };
        Ok(Self {
            host,
            port,
            database_file,
            seed_file,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn database_file_from(get: &impl Fn(&str) -> Option<String>) -> PathBuf {
    get("DATABASE_FILE")
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_FILE))
}

/// Settings for the portal sidecar's directory client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub api_base_url: String,
    pub request_timeout: Option<Duration>,
}

impl PortalConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_base_url = get("COACH_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let request_timeout = match get("COACH_API_TIMEOUT_SECS").filter(|v| !v.trim().is_empty()) {
            Some(v) => Some(Duration::from_secs(v.trim().parse::<u64>().with_context(
                || format!("COACH_API_TIMEOUT_SECS must be whole seconds, got {:?}", v),
            )?)),
            None => None,
        };
        Ok(Self {
            api_base_url,
            request_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn server_defaults() {
        let cfg = ServerConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.database_file, PathBuf::from("coaching-center.db"));
        assert_eq!(cfg.seed_file, PathBuf::from("seed_data.json"));
    }

    #[test]
    fn seed_file_sits_next_to_database() {
        let cfg = ServerConfig::from_lookup(lookup(&[("DATABASE_FILE", "/srv/data/center.db")]))
            .expect("config");
        assert_eq!(cfg.seed_file, PathBuf::from("/srv/data/seed_data.json"));
    }

    #[test]
    fn bad_port_is_a_startup_error() {
        assert!(ServerConfig::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("PORT", "70000")])).is_err());
    }

    #[test]
    fn portal_timeout_is_optional() {
        let cfg = PortalConfig::from_lookup(lookup(&[("COACH_API_URL", "http://10.0.0.2:4000/")]))
            .expect("config");
        assert_eq!(cfg.api_base_url, "http://10.0.0.2:4000");
        assert_eq!(cfg.request_timeout, None);
        let cfg = PortalConfig::from_lookup(lookup(&[("COACH_API_TIMEOUT_SECS", "5")])).expect("config");
        assert_eq!(cfg.request_timeout, Some(Duration::from_secs(5)));
    }
}
