use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use flatmatch_adapters::SourceConfig;
use flatmatch_storage::HttpClientConfig;
use serde::Deserialize;
use tokio::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

impl SmtpConfig {
    /// Sender address: `MAIL_FROM`, else the login name.
    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref().or(self.username.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
    pub scrape_cron: String,
    pub hourly_cron: String,
    pub daily_cron: String,
    pub match_threshold: f64,
    pub fallback_window_days: i64,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub smtp: SmtpConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            workspace_root: PathBuf::from("."),
            scrape_cron: "0 0,30 * * * *".to_string(),
            hourly_cron: "0 0 * * * *".to_string(),
            daily_cron: "0 0 9 * * *".to_string(),
            match_threshold: 70.0,
            fallback_window_days: 7,
            user_agent: "flatmatch-bot/0.1".to_string(),
            http_timeout_secs: 30,
            search_timeout_secs: 60,
            smtp: SmtpConfig {
                server: "smtp.gmail.com".to_string(),
                port: 587,
                username: None,
                password: None,
                from: None,
            },
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse().ok())
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_string("DATABASE_URL"),
            workspace_root: env_string("FLATMATCH_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            scrape_cron: env_string("FLATMATCH_SCRAPE_CRON").unwrap_or(defaults.scrape_cron),
            hourly_cron: env_string("FLATMATCH_HOURLY_CRON").unwrap_or(defaults.hourly_cron),
            daily_cron: env_string("FLATMATCH_DAILY_CRON").unwrap_or(defaults.daily_cron),
            match_threshold: env_parsed("FLATMATCH_MATCH_THRESHOLD").unwrap_or(defaults.match_threshold),
            fallback_window_days: env_parsed("FLATMATCH_FALLBACK_WINDOW_DAYS")
                .unwrap_or(defaults.fallback_window_days),
            user_agent: env_string("FLATMATCH_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parsed("FLATMATCH_HTTP_TIMEOUT_SECS").unwrap_or(defaults.http_timeout_secs),
            search_timeout_secs: env_parsed("FLATMATCH_SEARCH_TIMEOUT_SECS")
                .unwrap_or(defaults.search_timeout_secs),
            smtp: SmtpConfig {
                server: env_string("SMTP_SERVER").unwrap_or(defaults.smtp.server),
                port: env_parsed("SMTP_PORT").unwrap_or(defaults.smtp.port),
                username: env_string("SMTP_USERNAME"),
                password: env_string("SMTP_PASSWORD"),
                from: env_string("MAIL_FROM"),
            },
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn fallback_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.fallback_window_days)
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }
}

pub async fn load_source_registry(path: &Path) -> Result<SourceRegistry> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_registry_loads_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.yaml");
        std::fs::write(
            &path,
            r#"
sources:
  - source_id: flatfox
    enabled: true
  - source_id: immoscout
    enabled: false
    base_url: https://www.immoscout24.ch/de/immobilien/mieten/ort
"#,
        )
        .unwrap();

        let registry = load_source_registry(&path).await.unwrap();
        assert_eq!(registry.sources.len(), 2);
        assert!(registry.sources[0].enabled);
        assert!(registry.sources[0].base_url.is_none());
        assert_eq!(
            registry.sources[1].base_url.as_deref(),
            Some("https://www.immoscout24.ch/de/immobilien/mieten/ort")
        );
    }

    #[tokio::test]
    async fn missing_registry_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_source_registry(&dir.path().join("sources.yaml")).await.unwrap_err();
        assert!(err.to_string().contains("sources.yaml"));
    }

    #[test]
    fn defaults_follow_the_notification_schedule() {
        let config = PipelineConfig::default();
        assert_eq!(config.match_threshold, 70.0);
        assert_eq!(config.fallback_window(), chrono::Duration::days(7));
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.http_client_config().timeout, Duration::from_secs(30));
        assert_eq!(config.sources_path(), PathBuf::from("./sources.yaml"));
    }

    #[test]
    fn sender_falls_back_to_login() {
        let mut smtp = PipelineConfig::default().smtp;
        assert_eq!(smtp.sender(), None);
        smtp.username = Some("alerts@example.ch".into());
        assert_eq!(smtp.sender(), Some("alerts@example.ch"));
        smtp.from = Some("Flatmatch <noreply@example.ch>".into());
        assert_eq!(smtp.sender(), Some("Flatmatch <noreply@example.ch>"));
    }
}
