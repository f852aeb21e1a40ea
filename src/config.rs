//! Runtime settings resolved from the environment and the `app_config` table.

use url::Url;

use crate::error::{Error, Result};
use crate::storage::{repository, Database};
use crate::vendor::dexcom::{DexcomClient, DEFAULT_BASE_URL};

pub const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_SENDER_EMAIL: &str = "reports@localhost";
/// Days of data covered by one weekly report.
pub const REPORT_WINDOW_DAYS: u32 = 7;
/// Deliveries before a failing message is dead-lettered.
pub const DEFAULT_MAX_RECEIVES: u32 = 3;

/// A configurable value: its environment variable and `app_config` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingKey {
    pub env: &'static str,
    pub config: &'static str,
}

pub const DEXCOM_API_BASE_URL: SettingKey = SettingKey {
    env: "DEXCOM_API_BASE_URL",
    config: "dexcom_api_base_url",
};
pub const DEXCOM_CLIENT_ID: SettingKey = SettingKey {
    env: "DEXCOM_CLIENT_ID",
    config: "dexcom_client_id",
};
pub const DEXCOM_CLIENT_SECRET: SettingKey = SettingKey {
    env: "DEXCOM_CLIENT_SECRET",
    config: "dexcom_client_secret",
};
pub const SENDER_EMAIL: SettingKey = SettingKey {
    env: "SENDER_EMAIL",
    config: "sender_email",
};
pub const FRONTEND_BASE_URL: SettingKey = SettingKey {
    env: "FRONTEND_BASE_URL",
    config: "frontend_base_url",
};
pub const MAX_RECEIVES: SettingKey = SettingKey {
    env: "GLUCOPIPE_MAX_RECEIVES",
    config: "max_receives",
};

pub const ALL_KEYS: [SettingKey; 6] = [
    DEXCOM_API_BASE_URL,
    DEXCOM_CLIENT_ID,
    DEXCOM_CLIENT_SECRET,
    SENDER_EMAIL,
    FRONTEND_BASE_URL,
    MAX_RECEIVES,
];

/// Whether `key` is an `app_config` key the pipeline reads.
pub fn is_known_key(key: &str) -> bool {
    ALL_KEYS.iter().any(|k| k.config == key)
}

/// Config keys holding secrets; masked when listed.
pub fn is_secret_key(key: &str) -> bool {
    key == DEXCOM_CLIENT_SECRET.config
}

#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub dexcom_api_base_url: String,
    pub dexcom_client_id: Option<String>,
    pub dexcom_client_secret: Option<String>,
    pub sender_email: String,
    pub frontend_base_url: String,
    pub report_window_days: u32,
    pub max_receives: u32,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("dexcom_api_base_url", &self.dexcom_api_base_url)
            .field("dexcom_client_id", &self.dexcom_client_id)
            .field(
                "dexcom_client_secret",
                &self.dexcom_client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("sender_email", &self.sender_email)
            .field("frontend_base_url", &self.frontend_base_url)
            .field("report_window_days", &self.report_window_days)
            .field("max_receives", &self.max_receives)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dexcom_api_base_url: DEFAULT_BASE_URL.to_string(),
            dexcom_client_id: None,
            dexcom_client_secret: None,
            sender_email: DEFAULT_SENDER_EMAIL.to_string(),
            frontend_base_url: DEFAULT_FRONTEND_BASE_URL.to_string(),
            report_window_days: REPORT_WINDOW_DAYS,
            max_receives: DEFAULT_MAX_RECEIVES,
        }
    }
}

impl Settings {
    /// Resolve every key with `lookup_env` first, then `lookup_config`, then
    /// the default. Empty values count as unset.
    pub fn resolve(
        lookup_env: impl Fn(&str) -> Option<String>,
        lookup_config: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let get = |key: SettingKey| {
            clean(lookup_env(key.env)).or_else(|| clean(lookup_config(key.config)))
        };

        let defaults = Settings::default();
        let max_receives = match get(MAX_RECEIVES) {
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| Error::Config(format!("max_receives must be a positive integer, got {v:?}")))?,
            None => defaults.max_receives,
        };

        let settings = Self {
            dexcom_api_base_url: get(DEXCOM_API_BASE_URL).unwrap_or(defaults.dexcom_api_base_url),
            dexcom_client_id: get(DEXCOM_CLIENT_ID),
            dexcom_client_secret: get(DEXCOM_CLIENT_SECRET),
            sender_email: get(SENDER_EMAIL).unwrap_or(defaults.sender_email),
            frontend_base_url: get(FRONTEND_BASE_URL).unwrap_or(defaults.frontend_base_url),
            report_window_days: defaults.report_window_days,
            max_receives,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Load from the process environment and the database.
    pub async fn load(db: &Database) -> Result<Self> {
        let config: Vec<(String, String)> = db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?;
        Self::resolve(
            |k| std::env::var(k).ok(),
            |k| {
                config
                    .iter()
                    .find(|(key, _)| key == k)
                    .map(|(_, v)| v.clone())
            },
        )
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("dexcom_api_base_url", &self.dexcom_api_base_url),
            ("frontend_base_url", &self.frontend_base_url),
        ] {
            let url = Url::parse(value)
                .map_err(|e| Error::Config(format!("{name} is not a valid URL ({value:?}): {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::Config(format!("{name} must be an http(s) URL, got {value:?}")));
            }
        }
        Ok(())
    }

    /// Build the vendor client. Fails when the OAuth client is not configured.
    pub fn dexcom_client(&self) -> Result<DexcomClient> {
        let id = self.dexcom_client_id.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "Dexcom client id not set. Export {} or run: glucopipe config set {} <ID>",
                DEXCOM_CLIENT_ID.env, DEXCOM_CLIENT_ID.config
            ))
        })?;
        let secret = self.dexcom_client_secret.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "Dexcom client secret not set. Export {} or run: glucopipe config set {} <SECRET>",
                DEXCOM_CLIENT_SECRET.env, DEXCOM_CLIENT_SECRET.config
            ))
        })?;
        DexcomClient::new(&self.dexcom_api_base_url, id, secret)
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
    fn test_defaults() {
        let s = Settings::resolve(lookup(&[]), lookup(&[])).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.dexcom_api_base_url, "https://api.dexcom.com");
        assert_eq!(s.frontend_base_url, "http://localhost:3000");
        assert_eq!(s.report_window_days, 7);
        assert_eq!(s.max_receives, 3);
        assert!(matches!(s.dexcom_client(), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides_config() {
        let s = Settings::resolve(
            lookup(&[("SENDER_EMAIL", "env@example.com"), ("DEXCOM_CLIENT_ID", "")]),
            lookup(&[
                ("sender_email", "db@example.com"),
                ("dexcom_client_id", "db-id"),
                ("dexcom_client_secret", "db-secret"),
                ("dexcom_api_base_url", "https://sandbox-api.dexcom.com"),
            ]),
        )
        .unwrap();
        assert_eq!(s.sender_email, "env@example.com");
        // an empty env var falls through to the stored value
        assert_eq!(s.dexcom_client_id.as_deref(), Some("db-id"));
        let client = s.dexcom_client().unwrap();
        assert_eq!(client.base_url().as_str(), "https://sandbox-api.dexcom.com/");
    }

    #[test]
    fn test_blank_values_fall_through_to_default() {
        let s = Settings::resolve(
            lookup(&[("SENDER_EMAIL", "   "), ("FRONTEND_BASE_URL", "")]),
            lookup(&[("sender_email", ""), ("frontend_base_url", "https://app.example.com")]),
        )
        .unwrap();
        assert_eq!(s.sender_email, DEFAULT_SENDER_EMAIL);
        assert_eq!(s.frontend_base_url, "https://app.example.com");
    }

    #[test]
    fn test_invalid_values() {
        assert!(Settings::resolve(lookup(&[("FRONTEND_BASE_URL", "localhost")]), lookup(&[])).is_err());
        assert!(Settings::resolve(lookup(&[]), lookup(&[("dexcom_api_base_url", "ftp://x")])).is_err());
        assert!(Settings::resolve(lookup(&[]), lookup(&[("max_receives", "0")])).is_err());
        let s = Settings::resolve(lookup(&[]), lookup(&[("max_receives", "5")])).unwrap();
        assert_eq!(s.max_receives, 5);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let s = Settings::resolve(lookup(&[]), lookup(&[("dexcom_client_secret", "hunter2")])).unwrap();
        assert!(!format!("{s:?}").contains("hunter2"));
    }

    #[test]
    fn test_known_keys() {
        assert!(is_known_key("sender_email"));
        assert!(!is_known_key("workspace_gid"));
        assert!(is_secret_key("dexcom_client_secret"));
    }
}
