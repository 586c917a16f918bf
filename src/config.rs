use crate::error::{RavelinError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How the client behaves when the primary server cannot be reached.
///
/// A bit set: `READ_FROM_ALL_SERVERS` is a flag that can be combined with any
/// of the base behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FailoverBehavior(u32);

impl FailoverBehavior {
    /// Fail the request without attempting any failover.
    pub const FAIL_IMMEDIATELY: Self = FailoverBehavior(0);
    /// Reads may go to secondaries; writes to a secondary fail.
    pub const ALLOW_READS_FROM_SECONDARIES: Self = FailoverBehavior(1);
    /// Reads and writes may go to secondaries.
    pub const ALLOW_READS_FROM_SECONDARIES_AND_WRITES_TO_SECONDARIES: Self = FailoverBehavior(3);
    /// Spread reads across every server instead of only the primary.
    pub const READ_FROM_ALL_SERVERS: Self = FailoverBehavior(1024);

    const NAMES: [(&'static str, FailoverBehavior); 4] = [
        (
            "AllowReadsFromSecondariesAndWritesToSecondaries",
            Self::ALLOW_READS_FROM_SECONDARIES_AND_WRITES_TO_SECONDARIES,
        ),
        ("AllowReadsFromSecondaries", Self::ALLOW_READS_FROM_SECONDARIES),
        ("ReadFromAllServers", Self::READ_FROM_ALL_SERVERS),
        ("FailImmediately", Self::FAIL_IMMEDIATELY),
    ];

    pub fn contains(self, other: FailoverBehavior) -> bool {
        self.0 & other.0 == other.0
    }

    /// The base behavior with the `READ_FROM_ALL_SERVERS` flag masked off.
    pub fn without_flags(self) -> FailoverBehavior {
        FailoverBehavior(self.0 & !Self::READ_FROM_ALL_SERVERS.0)
    }

    /// True only for plain `FailImmediately` with no flags.
    pub fn is_fail_immediately(self) -> bool {
        self.0 == 0
    }
}

impl Default for FailoverBehavior {
    fn default() -> Self {
        Self::ALLOW_READS_FROM_SECONDARIES
    }
}

impl BitOr for FailoverBehavior {
    type Output = FailoverBehavior;

    fn bitor(self, rhs: FailoverBehavior) -> FailoverBehavior {
        FailoverBehavior(self.0 | rhs.0)
    }
}

impl fmt::Display for FailoverBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.without_flags();
        let base_name = Self::NAMES
            .iter()
            .find(|(_, b)| *b == base)
            .map(|(name, _)| *name);

        match base_name {
            Some(name) if self.contains(Self::READ_FROM_ALL_SERVERS) => {
                write!(f, "{}|ReadFromAllServers", name)
            }
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for FailoverBehavior {
    type Err = RavelinError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bits = 0;
        for part in s.split(['|', ',']).map(str::trim).filter(|p| !p.is_empty()) {
            let behavior = Self::NAMES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(part))
                .map(|(_, b)| *b)
                .ok_or_else(|| {
                    RavelinError::Config(format!("Unknown failover behavior: {}", part))
                })?;
            bits |= behavior.0;
        }
        Ok(FailoverBehavior(bits))
    }
}

impl TryFrom<String> for FailoverBehavior {
    type Error = RavelinError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FailoverBehavior> for String {
    fn from(b: FailoverBehavior) -> String {
        b.to_string()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn default_local_cache_dir() -> PathBuf {
    env::temp_dir().join("ravelin")
}

/// Client-wide conventions consulted by the caches and the replication
/// informer. Constructed once and passed to the components that need it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub failover_behavior: FailoverBehavior,

    /// Upper bound between health probes of a failing server.
    #[serde(rename = "max_failover_check_period_ms", with = "duration_ms")]
    pub max_failover_check_period: Duration,

    /// Minimum age of the replication topology before it is fetched again.
    #[serde(rename = "replication_refresh_interval_ms", with = "duration_ms")]
    pub replication_refresh_interval: Duration,

    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,

    pub http_cache_capacity: usize,

    /// Directory holding one replication topology file per server hash.
    pub local_cache_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            failover_behavior: FailoverBehavior::default(),
            max_failover_check_period: Duration::from_secs(5 * 60),
            replication_refresh_interval: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            http_cache_capacity: 2048,
            local_cache_dir: default_local_cache_dir(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RavelinError::Config(format!("Invalid {}: {}", name, raw))),
        Err(_) => Ok(None),
    }
}

impl ClientConfig {
    /// Load configuration from `RAVELIN_*` environment variables, falling
    /// back to defaults for anything unset.
    ///
    /// Optional: RAVELIN_FAILOVER_BEHAVIOR (e.g. `AllowReadsFromSecondaries|ReadFromAllServers`)
    /// Optional: RAVELIN_MAX_FAILOVER_CHECK_PERIOD_MS
    /// Optional: RAVELIN_REPLICATION_REFRESH_SECS
    /// Optional: RAVELIN_REQUEST_TIMEOUT_SECS
    /// Optional: RAVELIN_HTTP_CACHE_SIZE
    /// Optional: RAVELIN_CACHE_DIR
    pub fn from_env() -> Result<Self> {
        let mut config = ClientConfig::default();

        if let Ok(raw) = env::var("RAVELIN_FAILOVER_BEHAVIOR") {
            config.failover_behavior = raw.parse()?;
        }
        if let Some(ms) = env_parse::<u64>("RAVELIN_MAX_FAILOVER_CHECK_PERIOD_MS")? {
            config.max_failover_check_period = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("RAVELIN_REPLICATION_REFRESH_SECS")? {
            config.replication_refresh_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RAVELIN_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse::<usize>("RAVELIN_HTTP_CACHE_SIZE")? {
            config.http_cache_capacity = size;
        }
        if let Ok(dir) = env::var("RAVELIN_CACHE_DIR") {
            config.local_cache_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file, or return defaults when the file
    /// is missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<ClientConfig>(&content) {
                    Ok(config) => match config.validate() {
                        Ok(()) => {
                            tracing::info!(
                                "Loaded client config from {}: failover_behavior={}",
                                path.display(),
                                config.failover_behavior
                            );
                            return config;
                        }
                        Err(e) => {
                            tracing::error!("Rejected {}: {}, using defaults", path.display(), e);
                        }
                    },
                    Err(e) => {
                        tracing::error!(
                            "Failed to parse {}: {}, using defaults",
                            path.display(),
                            e
                        );
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read {}: {}, using defaults", path.display(), e);
                }
            }
        }

        ClientConfig::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.http_cache_capacity == 0 {
            return Err(RavelinError::Config(
                "http_cache_capacity must be at least 1".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(RavelinError::Config(
                "request_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for name in [
            "RAVELIN_FAILOVER_BEHAVIOR",
            "RAVELIN_MAX_FAILOVER_CHECK_PERIOD_MS",
            "RAVELIN_REPLICATION_REFRESH_SECS",
            "RAVELIN_REQUEST_TIMEOUT_SECS",
            "RAVELIN_HTTP_CACHE_SIZE",
            "RAVELIN_CACHE_DIR",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_failover_behavior_parse_and_display() {
        let b: FailoverBehavior = "AllowReadsFromSecondaries|ReadFromAllServers"
            .parse()
            .unwrap();
        assert!(b.contains(FailoverBehavior::ALLOW_READS_FROM_SECONDARIES));
        assert!(b.contains(FailoverBehavior::READ_FROM_ALL_SERVERS));
        assert_eq!(
            b.without_flags(),
            FailoverBehavior::ALLOW_READS_FROM_SECONDARIES
        );
        assert_eq!(b.to_string(), "AllowReadsFromSecondaries|ReadFromAllServers");

        let fail: FailoverBehavior = "failimmediately".parse().unwrap();
        assert!(fail.is_fail_immediately());
        assert_eq!(fail.to_string(), "FailImmediately");

        let rw = FailoverBehavior::ALLOW_READS_FROM_SECONDARIES_AND_WRITES_TO_SECONDARIES;
        assert!(rw.contains(FailoverBehavior::ALLOW_READS_FROM_SECONDARIES));
        assert_eq!(rw.to_string(), "AllowReadsFromSecondariesAndWritesToSecondaries");

        assert!("Sometimes".parse::<FailoverBehavior>().is_err());
    }

    #[test]
    fn test_read_from_all_servers_alone_is_not_fail_immediately() {
        let b = FailoverBehavior::FAIL_IMMEDIATELY | FailoverBehavior::READ_FROM_ALL_SERVERS;
        assert!(!b.is_fail_immediately());
        assert!(b.without_flags().is_fail_immediately());
        assert_eq!(b.to_string(), "FailImmediately|ReadFromAllServers");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(
            config.failover_behavior,
            FailoverBehavior::ALLOW_READS_FROM_SECONDARIES
        );
        assert_eq!(config.max_failover_check_period, Duration::from_secs(300));
        assert_eq!(config.http_cache_capacity, 2048);
        assert!(config.local_cache_dir.ends_with("ravelin"));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("RAVELIN_FAILOVER_BEHAVIOR", "FailImmediately");
        env::set_var("RAVELIN_MAX_FAILOVER_CHECK_PERIOD_MS", "1500");
        env::set_var("RAVELIN_HTTP_CACHE_SIZE", "16");
        env::set_var("RAVELIN_CACHE_DIR", "/var/cache/ravelin-test");

        let config = ClientConfig::from_env().unwrap();
        assert!(config.failover_behavior.is_fail_immediately());
        assert_eq!(config.max_failover_check_period, Duration::from_millis(1500));
        assert_eq!(config.http_cache_capacity, 16);
        assert_eq!(
            config.local_cache_dir,
            PathBuf::from("/var/cache/ravelin-test")
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_invalid_values() {
        clear_env();
        env::set_var("RAVELIN_HTTP_CACHE_SIZE", "lots");
        assert!(matches!(
            ClientConfig::from_env(),
            Err(RavelinError::Config(_))
        ));

        env::set_var("RAVELIN_HTTP_CACHE_SIZE", "0");
        assert!(ClientConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    fn test_load_or_default_no_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_or_default(&temp_dir.path().join("client.json"));
        assert_eq!(config.http_cache_capacity, 2048);
    }

    #[test]
    fn test_load_or_default_valid_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("client.json");

        let config_str = r#"{
            "failover_behavior": "AllowReadsFromSecondariesAndWritesToSecondaries",
            "max_failover_check_period_ms": 2000,
            "http_cache_capacity": 64,
            "local_cache_dir": "/tmp/ravelin-topology"
        }"#;
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(config_str.as_bytes()).unwrap();

        let config = ClientConfig::load_or_default(&path);
        assert_eq!(
            config.failover_behavior,
            FailoverBehavior::ALLOW_READS_FROM_SECONDARIES_AND_WRITES_TO_SECONDARIES
        );
        assert_eq!(config.max_failover_check_period, Duration::from_secs(2));
        assert_eq!(config.http_cache_capacity, 64);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_load_or_default_invalid_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("client.json");
        std::fs::write(&path, b"invalid json").unwrap();

        let config = ClientConfig::load_or_default(&path);
        assert_eq!(
            config.failover_behavior,
            FailoverBehavior::ALLOW_READS_FROM_SECONDARIES
        );
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = ClientConfig {
            failover_behavior: FailoverBehavior::ALLOW_READS_FROM_SECONDARIES
                | FailoverBehavior::READ_FROM_ALL_SERVERS,
            ..ClientConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json["failover_behavior"],
            "AllowReadsFromSecondaries|ReadFromAllServers"
        );
        assert_eq!(json["max_failover_check_period_ms"], 300_000);

        let back: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.failover_behavior, config.failover_behavior);
    }
}
