//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::models::ScopeType;
use crate::telemetry::LoggingConfig;

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database configuration (absent when running on the in-memory store)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Defaults applied to newly created governance settings
    #[serde(default)]
    pub governance: GovernanceDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long to wait for a pooled connection (e.g. "5s")
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

/// Limits written into the settings of every new scope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GovernanceDefaults {
    #[serde(default = "default_organization_max_members")]
    pub organization_max_members: u32,

    #[serde(default = "default_team_max_members")]
    pub team_max_members: u32,

    #[serde(default = "default_project_max_members")]
    pub project_max_members: u32,

    /// Teams per organization
    #[serde(default = "default_max_teams")]
    pub max_teams: u32,

    /// Projects per organization or team
    #[serde(default = "default_max_projects")]
    pub max_projects: u32,
}

impl GovernanceDefaults {
    pub fn max_members_for(&self, scope_type: ScopeType) -> u32 {
        match scope_type {
            ScopeType::Organization => self.organization_max_members,
            ScopeType::Team => self.team_max_members,
            ScopeType::Project => self.project_max_members,
        }
    }
}

impl Default for GovernanceDefaults {
    fn default() -> Self {
        Self {
            organization_max_members: default_organization_max_members(),
            team_max_members: default_team_max_members(),
            project_max_members: default_project_max_members(),
            max_teams: default_max_teams(),
            max_projects: default_max_projects(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_organization_max_members() -> u32 { 50 }
fn default_team_max_members() -> u32 { 20 }
fn default_project_max_members() -> u32 { 20 }
fn default_max_teams() -> u32 { 5 }
fn default_max_projects() -> u32 { 10 }

impl Config {
    /// Load configuration from `.env` and `WARDEN__*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_governance_defaults() {
        let defaults = GovernanceDefaults::default();
        assert_eq!(defaults.max_members_for(ScopeType::Organization), 50);
        assert_eq!(defaults.max_members_for(ScopeType::Team), 20);
        assert_eq!(defaults.max_members_for(ScopeType::Project), 20);
        assert_eq!(defaults.max_teams, 5);
        assert_eq!(defaults.max_projects, 10);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgres://localhost/warden"
acquire_timeout = "750ms"

[logging]
level = "debug"
format = "pretty"

[governance]
team_max_members = 12
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();

        let database = config.database.unwrap();
        assert_eq!(database.url, "postgres://localhost/warden");
        assert_eq!(database.acquire_timeout, Duration::from_millis(750));
        assert_eq!(database.max_connections, 20);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.governance.team_max_members, 12);
        assert_eq!(config.governance.organization_max_members, 50);
    }

    #[test]
    fn test_database_is_optional() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let config = Config::from_file(&path).unwrap();
        assert!(config.database.is_none());
        assert_eq!(config.governance, GovernanceDefaults::default());
    }
}
