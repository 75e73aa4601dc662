use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::feed::FeedOptions;

pub const SETTINGS_FILE: &str = "storefront.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub asset_base_url: String,
    pub database_url: String,
    pub page_size: u32,
    pub search_debounce_ms: u64,
    pub request_timeout_secs: u64,
    /// Sign out automatically when the feed reports an authorization failure.
    pub logout_on_authorization_error: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://backend-practice.eurisko.me/api".into(),
            asset_base_url: "https://backend-practice.eurisko.me".into(),
            database_url: "sqlite://./data/storefront.db".into(),
            page_size: 10,
            search_debounce_ms: 500,
            request_timeout_secs: 15,
            logout_on_authorization_error: false,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            page_size: self.page_size,
            search_debounce: Duration::from_millis(self.search_debounce_ms),
            ..FeedOptions::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    asset_base_url: Option<String>,
    database_url: Option<String>,
    page_size: Option<u32>,
    search_debounce_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    logout_on_authorization_error: Option<bool>,
}

/// Defaults, then `storefront.toml` in the working directory, then the
/// environment.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), "config: ignoring unreadable settings file: {err}"),
        }
    }

    if let Some(v) = env("STOREFRONT_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__ASSET_BASE_URL") {
        settings.asset_base_url = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(parsed) = parse_env(&env, "APP__PAGE_SIZE") {
        settings.page_size = parsed;
    }
    if let Some(parsed) = parse_env(&env, "APP__SEARCH_DEBOUNCE_MS") {
        settings.search_debounce_ms = parsed;
    }
    if let Some(parsed) = parse_env(&env, "APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = parsed;
    }
    if let Some(parsed) = parse_env(&env, "APP__LOGOUT_ON_AUTH_ERROR") {
        settings.logout_on_authorization_error = parsed;
    }

    settings.database_url = normalize_database_url(&settings.database_url);
    settings
}

fn apply_file(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.asset_base_url {
        settings.asset_base_url = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.page_size {
        settings.page_size = v;
    }
    if let Some(v) = file_cfg.search_debounce_ms {
        settings.search_debounce_ms = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.logout_on_authorization_error {
        settings.logout_on_authorization_error = v;
    }
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %raw, "config: ignoring unparsable value");
            None
        }
    }
}

/// Accepts sqlite urls as-is and turns bare file paths into `sqlite://` urls.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return ClientSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
