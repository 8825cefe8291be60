pub mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::settings::PartialSettings;

pub use settings::{AuthSettings, BrokerSettings, ServerSettings, Settings, StorageSettings};

/// Load settings from `config/default.*` (optional) and the environment
/// (`SERVER_PORT`, `STORAGE_PATH`, ...), merged over the defaults, then
/// validate the result.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = merge(partial);
    validate(&settings)?;
    Ok(settings)
}

fn merge(partial: PartialSettings) -> Settings {
    let default = Settings::default();

    Settings {
        server: ServerSettings {
            protocol: partial
                .server
                .as_ref()
                .and_then(|s| s.protocol.clone())
                .unwrap_or(default.server.protocol),
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            stats_port: partial
                .server
                .as_ref()
                .and_then(|s| s.stats_port)
                .or(default.server.stats_port),
        },
        storage: StorageSettings {
            path: partial
                .storage
                .as_ref()
                .and_then(|s| s.path.clone())
                .unwrap_or(default.storage.path),
            in_memory: partial
                .storage
                .as_ref()
                .and_then(|s| s.in_memory)
                .unwrap_or(default.storage.in_memory),
        },
        broker: BrokerSettings {
            redelivery_interval_secs: partial
                .broker
                .as_ref()
                .and_then(|b| b.redelivery_interval_secs)
                .unwrap_or(default.broker.redelivery_interval_secs),
        },
        auth: AuthSettings {
            user: partial
                .auth
                .as_ref()
                .and_then(|a| a.user.clone())
                .unwrap_or(default.auth.user),
            password: partial
                .auth
                .as_ref()
                .and_then(|a| a.password.clone())
                .unwrap_or(default.auth.password),
        },
    }
}

/// Misconfigurations that must stop the process before it binds anything.
pub fn validate(settings: &Settings) -> Result<(), ConfigError> {
    match settings.server.protocol.as_str() {
        "tcp" | "tcp4" | "tcp6" => {}
        other => {
            return Err(ConfigError::Message(format!(
                "unsupported protocol {other:?}, expected tcp, tcp4 or tcp6"
            )))
        }
    }

    if settings.server.stats_port == Some(settings.server.port) {
        return Err(ConfigError::Message(format!(
            "stats port {} collides with the broker port",
            settings.server.port
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 9845);
        assert_eq!(settings.broker.redelivery_interval_secs, 10);
        assert!(!settings.storage.in_memory);
        assert!(!settings.auth.is_enabled());
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn auth_enabled_when_either_field_set() {
        let mut auth = AuthSettings::default();
        assert!(!auth.is_enabled());
        auth.user = "u".to_string();
        assert!(auth.is_enabled());
        auth = AuthSettings {
            user: String::new(),
            password: "p".to_string(),
        };
        assert!(auth.is_enabled());
    }

    #[test]
    fn validate_rejects_colliding_ports() {
        let mut settings = Settings::default();
        settings.server.stats_port = Some(settings.server.port);
        assert!(validate(&settings).is_err());

        settings.server.stats_port = Some(settings.server.port + 1);
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_protocol() {
        let mut settings = Settings::default();
        settings.server.protocol = "udp".to_string();
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn load_config_from_file_overrides_defaults() {
        // Run load_config from a temp cwd holding a config/default.toml
        let tmp = TempDir::new().expect("create tempdir");
        let orig = env::current_dir().expect("current_dir");
        env::set_current_dir(tmp.path()).expect("set current dir");

        fs::create_dir_all("config").expect("create config dir");
        let toml = r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            stats_port = 9001

            [storage]
            in_memory = true

            [broker]
            redelivery_interval_secs = 1

            [auth]
            user = "admin"
            password = "secret"
        "#;
        fs::write("config/default.toml", toml).expect("write config file");

        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.stats_port, Some(9001));
        assert_eq!(cfg.server.protocol, "tcp"); // default survives
        assert!(cfg.storage.in_memory);
        assert_eq!(cfg.broker.redelivery_interval_secs, 1);
        assert!(cfg.auth.is_enabled());

        env::set_current_dir(orig).expect("restore cwd");
    }
}
