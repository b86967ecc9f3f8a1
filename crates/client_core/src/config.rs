use std::{fs, path::Path, str::FromStr, time::Duration};

use serde::Deserialize;
use tracing::warn;

const SETTINGS_FILE: &str = "client.toml";

/// How verified customers are assigned an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerIdScheme {
    /// `customer_<local>_<millis>`. Two verifications of the same email in
    /// the same millisecond collide.
    Timestamp,
    /// The timestamp form plus a random suffix.
    #[default]
    Unique,
}

impl FromStr for CustomerIdScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "timestamp" => Ok(Self::Timestamp),
            "unique" => Ok(Self::Unique),
            other => Err(format!("unknown customer id scheme '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub gateway_timeout_secs: u64,
    pub resend_countdown_secs: u32,
    pub terminal_reset_delay_ms: u64,
    pub otp_digits: usize,
    pub customer_id_scheme: CustomerIdScheme,
    pub database_url: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            gateway_timeout_secs: 15,
            resend_countdown_secs: 60,
            terminal_reset_delay_ms: 2_500,
            otp_digits: 6,
            customer_id_scheme: CustomerIdScheme::default(),
            database_url: "sqlite://booking.db".into(),
        }
    }
}

impl ClientSettings {
    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn terminal_reset_delay(&self) -> Duration {
        Duration::from_millis(self.terminal_reset_delay_ms)
    }
}

/// `client.toml` in the working directory, then `APP__*` environment overrides.
pub fn load_settings() -> ClientSettings {
    let mut settings = load_settings_file(Path::new(SETTINGS_FILE));
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn load_settings_file(path: &Path) -> ClientSettings {
    let Ok(raw) = fs::read_to_string(path) else {
        return ClientSettings::default();
    };
    match toml::from_str::<ClientSettings>(&raw) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(path = %path.display(), "ignoring unreadable settings file: {err}");
            ClientSettings::default()
        }
    }
}

pub fn apply_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = parsed(&lookup, "APP__GATEWAY_TIMEOUT_SECS") {
        settings.gateway_timeout_secs = v;
    }
    if let Some(v) = parsed(&lookup, "APP__RESEND_COUNTDOWN_SECS") {
        settings.resend_countdown_secs = v;
    }
    if let Some(v) = parsed(&lookup, "APP__TERMINAL_RESET_DELAY_MS") {
        settings.terminal_reset_delay_ms = v;
    }
    if let Some(v) = parsed::<usize>(&lookup, "APP__OTP_DIGITS") {
        if v == 0 {
            warn!("ignoring APP__OTP_DIGITS=0");
        } else {
            settings.otp_digits = v;
        }
    }
    if let Some(v) = parsed(&lookup, "APP__CUSTOMER_ID_SCHEME") {
        settings.customer_id_scheme = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, value = %raw, "ignoring invalid setting override: {err}");
            None
        }
    }
}
