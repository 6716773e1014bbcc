//! Runtime configuration.
//!
//! Loaded once at startup from `~/.studio-reminders/config.toml` and passed
//! by reference into each component. A missing file means defaults; a file
//! that does not parse is a configuration error.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngineError, Result};
use crate::phone::normalize_phone;

const STATE_DIR: &str = ".studio-reminders";
const CONFIG_FILE: &str = "config.toml";

pub const ENV_ADMIN_PHONE: &str = "STUDIO_ADMIN_PHONE";
pub const ENV_ENVIRONMENT: &str = "STUDIO_ENVIRONMENT";
pub const ENV_DB_PATH: &str = "STUDIO_DB_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "staging" | "dev" => Some(Environment::Staging),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudioConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Admin recipient for digests, alerts and transition notices.
    #[serde(default)]
    pub admin_phone: String,
    /// Studio local time, as minutes east of UTC.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default)]
    pub phone_number_id: String,
    /// Name of the environment variable holding the access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub roster_path: Option<PathBuf>,
    #[serde(default)]
    pub clients_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Built-in next_hour poll interval; 0 leaves polling to external cron.
    #[serde(default = "default_next_hour_poll_secs")]
    pub next_hour_poll_secs: u64,
    /// How far ahead an inbound keyword looks for the client's next session.
    #[serde(default = "default_inbound_lookahead_days")]
    pub inbound_lookahead_days: i64,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            admin_phone: String::new(),
            utc_offset_minutes: default_utc_offset_minutes(),
            db_path: None,
            transport: TransportConfig::default(),
            sources: SourcesConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            graph_url: default_graph_url(),
            phone_number_id: String::new(),
            access_token_env: default_access_token_env(),
            language_code: default_language_code(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            next_hour_poll_secs: default_next_hour_poll_secs(),
            inbound_lookahead_days: default_inbound_lookahead_days(),
        }
    }
}

fn default_utc_offset_minutes() -> i32 {
    120
}

fn default_graph_url() -> String {
    "https://graph.facebook.com/v21.0".to_string()
}

fn default_access_token_env() -> String {
    "ACCESS_TOKEN".to_string()
}

fn default_language_code() -> String {
    "en".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_next_hour_poll_secs() -> u64 {
    300
}

fn default_inbound_lookahead_days() -> i64 {
    14
}

pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EngineError::configuration("state dir", "Home directory not found"))?;
    Ok(home.join(STATE_DIR))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(state_dir()?.join(CONFIG_FILE))
}

impl StudioConfig {
    pub fn load(path: Option<PathBuf>) -> Result<StudioConfig> {
        let config_path = match path {
            Some(path) => path,
            None => default_config_path()?,
        };

        if !config_path.exists() {
            return Ok(StudioConfig::default());
        }

        let content = fs_err::read_to_string(&config_path).map_err(|err| {
            EngineError::configuration(
                format!("read {}", config_path.display()),
                err.to_string(),
            )
        })?;
        toml::from_str::<StudioConfig>(&content).map_err(|err| {
            EngineError::configuration(
                format!("parse {}", config_path.display()),
                err.to_string(),
            )
        })
    }

    /// Apply process-environment overrides. `lookup` is injected so tests do
    /// not have to mutate the real environment.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(phone) = lookup(ENV_ADMIN_PHONE).filter(|v| !v.trim().is_empty()) {
            self.admin_phone = phone;
        }
        if let Some(raw) = lookup(ENV_ENVIRONMENT).filter(|v| !v.trim().is_empty()) {
            self.environment = Environment::from_str(&raw).ok_or_else(|| {
                EngineError::configuration(
                    ENV_ENVIRONMENT,
                    format!("unknown environment {:?}", raw),
                )
            })?;
        }
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
            self.db_path = Some(PathBuf::from(path));
        }
        Ok(self)
    }

    pub fn local_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            EngineError::configuration(
                "utc_offset_minutes",
                format!("{} is out of range", self.utc_offset_minutes),
            )
        })
    }

    /// Normalized admin phone; a missing or unusable number is fatal for
    /// anything that must reach the admin.
    pub fn admin_recipient(&self) -> Result<String> {
        if self.admin_phone.trim().is_empty() {
            return Err(EngineError::configuration("admin_phone", "not configured"));
        }
        normalize_phone(&self.admin_phone).ok_or_else(|| {
            EngineError::configuration(
                "admin_phone",
                format!("{:?} is not a phone number", self.admin_phone),
            )
        })
    }

    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(state_dir()?.join("state.db")),
        }
    }

    pub fn resolved_roster_path(&self) -> Result<PathBuf> {
        match &self.sources.roster_path {
            Some(path) => Ok(path.clone()),
            None => Ok(state_dir()?.join("roster.json")),
        }
    }

    pub fn resolved_clients_path(&self) -> Result<PathBuf> {
        match &self.sources.clients_path {
            Some(path) => Ok(path.clone()),
            None => Ok(state_dir()?.join("clients.json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = StudioConfig::load(Some(path)).expect("load config");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.utc_offset_minutes, 120);
        assert_eq!(config.transport.timeout_secs, 20);
        assert_eq!(config.schedule.next_hour_poll_secs, 300);
    }

    #[test]
    fn load_parses_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
environment = "staging"
admin_phone = "082 555 0000"
utc_offset_minutes = 60

[transport]
phone_number_id = "802833389569115"
language_code = "en_US"
timeout_secs = 15

[sources]
roster_path = "/srv/studio/roster.json"

[schedule]
next_hour_poll_secs = 0
"#,
        )
        .expect("write config");

        let config = StudioConfig::load(Some(path)).expect("load config");
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.admin_recipient().expect("admin"), "27825550000");
        assert_eq!(config.transport.phone_number_id, "802833389569115");
        assert_eq!(config.transport.language_code, "en_US");
        assert_eq!(config.transport.timeout_secs, 15);
        assert_eq!(config.transport.access_token_env, "ACCESS_TOKEN");
        assert_eq!(
            config.resolved_roster_path().expect("roster"),
            PathBuf::from("/srv/studio/roster.json")
        );
        assert_eq!(config.schedule.next_hour_poll_secs, 0);
        assert_eq!(config.schedule.inbound_lookahead_days, 14);
        assert_eq!(
            config.local_offset().expect("offset"),
            FixedOffset::east_opt(3600).expect("offset")
        );
    }

    #[test]
    fn malformed_file_is_configuration_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "environment = [").expect("write config");
        let err = StudioConfig::load(Some(path)).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_ADMIN_PHONE, "+27 82 000 1111"),
            (ENV_ENVIRONMENT, "staging"),
        ]);
        let config = StudioConfig::default()
            .with_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.admin_recipient().expect("admin"), "27820001111");
    }

    #[test]
    fn unknown_environment_override_is_rejected() {
        let result = StudioConfig::default()
            .with_env_overrides(|key| (key == ENV_ENVIRONMENT).then(|| "qa".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn missing_admin_phone_is_configuration_error() {
        let err = StudioConfig::default().admin_recipient().unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }
}
