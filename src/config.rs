// src/config.rs
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_LOGIN_URL: &str =
    "https://sys.ndhu.edu.tw/gc/sportcenter/SportsFields/login.aspx";

/// Every wait the bot performs. Element waits are upper bounds, the rest are
/// fixed sleeps that let postbacks and captcha swaps settle.
#[derive(Debug, Clone)]
pub struct Timings {
    pub element_timeout: Duration,
    pub captcha_timeout: Duration,
    pub long_timeout: Duration,
    pub captcha_settle: Duration,
    pub attempt_delay: Duration,
    pub retry_pause: Duration,
    pub refresh_settle: Duration,
    pub submit_settle: Duration,
    pub page_settle: Duration,
    pub select_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(20),
            captcha_timeout: Duration::from_secs(10),
            long_timeout: Duration::from_secs(30),
            captcha_settle: Duration::from_millis(500),
            attempt_delay: Duration::from_secs(1),
            retry_pause: Duration::from_secs(2),
            refresh_settle: Duration::from_secs(2),
            submit_settle: Duration::from_secs(3),
            page_settle: Duration::from_secs(3),
            select_settle: Duration::from_secs(1),
        }
    }
}

impl Timings {
    /// All sleeps zeroed, element waits kept short. Used by tests.
    pub fn instant() -> Self {
        Self {
            element_timeout: Duration::from_millis(50),
            captcha_timeout: Duration::from_millis(50),
            long_timeout: Duration::from_millis(50),
            captcha_settle: Duration::ZERO,
            attempt_delay: Duration::ZERO,
            retry_pause: Duration::ZERO,
            refresh_settle: Duration::ZERO,
            submit_settle: Duration::ZERO,
            page_settle: Duration::ZERO,
            select_settle: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub login_url: String,
    pub account: Option<String>,
    pub password: Option<String>,
    /// `YYYY/MM/DD`, written straight into the date box.
    pub target_date: String,
    /// Option value of the court dropdown, e.g. "VOL0A".
    pub court: String,
    /// Slot label on the apply button, e.g. "06~08".
    pub time_slot: String,
    pub max_attempts: u32,
    pub min_captcha_len: usize,
    pub success_markers: Vec<String>,
    pub debug_dir: Option<PathBuf>,
    pub refresh_on_transcription_failure: bool,
    pub keep_browser_open: bool,
    pub timings: Timings,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            account: None,
            password: None,
            target_date: "2025/06/20".to_string(),
            court: "VOL0A".to_string(),
            time_slot: "06~08".to_string(),
            max_attempts: 5,
            min_captcha_len: 4,
            success_markers: vec!["申請成功".to_string(), "成功".to_string()],
            debug_dir: Some(PathBuf::from("captcha_debug_images")),
            refresh_on_transcription_failure: false,
            keep_browser_open: true,
            timings: Timings::default(),
        }
    }
}

impl BookingConfig {
    /// Build from the process environment. `.env` is loaded once by the binary.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let account = non_empty_var("ACCOUNT");
        let password = non_empty_var("PASSWORD");
        if account.is_none() || password.is_none() {
            warn!("ACCOUNT or PASSWORD is not set; login will not be attempted");
        }

        let debug_dir = match env::var("CAPTCHA_DEBUG_DIR") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => defaults.debug_dir,
        };

        let success_markers = env::var("SUCCESS_MARKERS")
            .ok()
            .map(|s| parse_markers(&s))
            .filter(|m| !m.is_empty())
            .unwrap_or(defaults.success_markers);

        Self {
            login_url: env::var("LOGIN_URL").unwrap_or(defaults.login_url),
            account,
            password,
            target_date: env::var("BOOKING_DATE").unwrap_or(defaults.target_date),
            court: env::var("BOOKING_COURT").unwrap_or(defaults.court),
            time_slot: env::var("BOOKING_SLOT").unwrap_or(defaults.time_slot),
            max_attempts: parsed_var("MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            min_captcha_len: parsed_var("MIN_CAPTCHA_LEN").unwrap_or(defaults.min_captcha_len),
            success_markers,
            debug_dir,
            refresh_on_transcription_failure: flag_var("REFRESH_ON_TRANSCRIPTION_FAILURE")
                .unwrap_or(defaults.refresh_on_transcription_failure),
            keep_browser_open: flag_var("KEEP_BROWSER_OPEN").unwrap_or(defaults.keep_browser_open),
            timings: defaults.timings,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.account.is_some() && self.password.is_some()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn flag_var(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| parse_flag(&v))
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y")
}

fn parse_markers(s: &str) -> Vec<String> {
    s.split(',')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}
