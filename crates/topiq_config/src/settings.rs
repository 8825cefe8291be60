use serde::Deserialize;

/// Top-level configuration for the broker process.
///
/// Aggregates the listener parameters, the persistence location, the
/// redelivery cadence and the optional shared credential pair.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub broker: BrokerSettings,
    pub auth: AuthSettings,
}

/// Listener configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// Listener protocol: `tcp`, `tcp4` or `tcp6`. The effective address
    /// family follows `host`; the value is validated and logged.
    pub protocol: String,
    /// The address the broker binds to.
    pub host: String,
    /// The port the broker listens on.
    pub port: u16,
    /// Optional port for the stats HTTP endpoint. Must differ from
    /// `port`; unset disables the endpoint.
    pub stats_port: Option<u16>,
}

/// Persistence configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    /// Filesystem path of the message store. Ignored when `in_memory`.
    pub path: String,
    /// Keep messages in an ephemeral store instead of on disk.
    pub in_memory: bool,
}

/// Broker engine configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Seconds between redelivery passes over unacknowledged messages.
    pub redelivery_interval_secs: u64,
}

/// Shared credential pair. Leaving both fields empty disables the `AUTH`
/// requirement; setting either one enables it.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthSettings {
    pub user: String,
    pub password: String,
}

impl AuthSettings {
    pub fn is_enabled(&self) -> bool {
        !self.user.is_empty() || !self.password.is_empty()
    }
}

/// Partially specified settings from files or the environment; missing
/// values fall back to [`Settings::default`].
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub storage: Option<PartialStorageSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub auth: Option<PartialAuthSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub stats_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
    pub in_memory: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub redelivery_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialAuthSettings {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                protocol: "tcp".to_string(),
                host: "127.0.0.1".to_string(),
                port: 9845,
                stats_port: None,
            },
            storage: StorageSettings {
                path: "data/topiq".to_string(),
                in_memory: false,
            },
            broker: BrokerSettings {
                redelivery_interval_secs: 10,
            },
            auth: AuthSettings::default(),
        }
    }
}
