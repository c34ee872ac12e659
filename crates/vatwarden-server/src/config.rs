//! Host configuration: the vat's `[service]`, `[vat]` and `[admin]` tables
//! plus the binary's own `[telemetry]` table.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vatwarden_core::config::{AdminSection, ServiceSection, VatSection};
use vatwarden_core::{RegistryEntry, ResolverEntry, ServiceConfig};

const REQUIRED_SECTIONS: [&str; 2] = ["service", "vat"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),
    #[error("invalid configuration in {path}: {message}")]
    Invalid { path: PathBuf, message: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceSection,
    pub vat: VatSection,
    #[serde(default)]
    pub admin: AdminSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySection {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Serve Prometheus metrics on this address when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            metrics_addr: None,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn from_toml(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            message,
        };
        let table: toml::Table = toml::from_str(content).map_err(|err| invalid(err.to_string()))?;
        for section in REQUIRED_SECTIONS {
            if !table.contains_key(section) {
                return Err(ConfigError::Missing(format!(
                    "[{section}] section in {}",
                    path.display()
                )));
            }
        }
        toml::Value::Table(table)
            .try_into()
            .map_err(|err: toml::de::Error| invalid(err.to_string()))
    }

    /// Loads the file at `path`. A missing path is fatal.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.ok_or_else(|| ConfigError::Missing("no configuration file given".into()))?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(path, &content)
    }

    /// Template printed by `--output-config` and written by `--write-config`.
    pub fn template() -> Self {
        let mut config = Self::default();
        config.service.registries = vec![RegistryEntry::new(
            "jrpc://127.0.0.1:9901/registrar",
            "my-service",
            "models",
        )];
        config.vat.port = Some(0);
        config.vat.resolvers = vec![ResolverEntry::new(
            "jrpc://127.0.0.1:9902/resolver",
            Some("my-vat".to_string()),
        )];
        config.vat.restorer_container_sr = Some("sqlite:vatwarden.db".to_string());
        config
    }

    pub fn render(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self)?;
        Ok(format!("# vatwarden-server configuration\n\n{body}"))
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            service: self.service.clone(),
            vat: self.vat.clone(),
            admin: self.admin.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(content: &str) -> Result<AppConfig, ConfigError> {
        AppConfig::from_toml(Path::new("vat.toml"), content)
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let config = parse("[service]\n[vat]\n").unwrap();
        assert!(config.vat.serve_bootstrap);
        assert_eq!(config.admin.grace_period_secs, 5);
        assert_eq!(config.telemetry.log_filter, "info");
        assert!(!config.service.unregister_on_stop);
    }

    #[test]
    fn full_file_is_read() {
        let config = parse(
            r#"
            [service]
            fixed_sturdy_ref_token = "main"
            unregister_on_stop = true
            [[service.registries]]
            sturdy_ref = "jrpc://reg:1/r"
            name = "weather"
            category_id = "data"

            [vat]
            host = "0.0.0.0"
            port = 9000
            serve_bootstrap = false
            restorer_container_sr = "sqlite:/tmp/vat.db"
            [[vat.resolvers]]
            sturdy_ref = "jrpc://res:2/r"
            alias = "weather-vat"

            [admin]
            timeout_secs = 60

            [telemetry]
            log_filter = "debug"
            metrics_addr = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        let service = config.service_config();
        assert_eq!(service.service.fixed_sturdy_ref_token.as_deref(), Some("main"));
        assert_eq!(service.service.registries[0].name.as_deref(), Some("weather"));
        assert_eq!(service.vat.port, Some(9000));
        assert!(!service.vat.serve_bootstrap);
        assert_eq!(service.vat.resolvers[0].label(), "weather-vat");
        assert_eq!(service.admin_settings().timeout_secs, 60);
        assert_eq!(config.telemetry.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[rstest]
    #[case::no_service("[vat]\n")]
    #[case::no_vat("[service]\n")]
    #[case::empty("")]
    fn absent_sections_are_missing(#[case] content: &str) {
        assert!(matches!(parse(content), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn no_path_is_missing() {
        assert!(matches!(AppConfig::load(None), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn wrong_types_are_invalid() {
        let result = parse("[service]\n[vat]\nport = \"nine\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rendered_template_parses_back() {
        let template = AppConfig::template();
        let rendered = template.render().unwrap();
        assert!(rendered.starts_with("# vatwarden-server configuration"));
        assert_eq!(parse(&rendered).unwrap(), template);
    }
}
