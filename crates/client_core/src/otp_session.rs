//! Email + one-time-code login with per-box digit entry.
//!
//! The session owns its resend [`TimerService`]; dropping the session stops
//! the countdown. Verification fires automatically the moment the last empty
//! box is filled.

use std::{sync::Arc, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    config::ClientSettings,
    error::bounded,
    state::StateCell,
    timer::{TimerService, TimerState, DEFAULT_COUNTDOWN_SECS},
    BackendGateway,
};

pub const INVALID_EMAIL_MESSAGE: &str = "Please enter a valid email address";
pub const INVALID_OTP_MESSAGE: &str = "Invalid OTP. Please try again.";
const SEND_FAILED_MESSAGE: &str = "Failed to send verification email";
const RESEND_FAILED_MESSAGE: &str = "Failed to resend verification email";

static STRICT_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._-]+@[a-z]+(\.+[a-z]+)+$").expect("strict email pattern compiles")
});

/// How strictly an email address is checked before a code is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailRule {
    /// `local@label.label…` with lowercase-letter domain labels. Accepts some
    /// addresses a real validator would not (`a@b..c`); that is the fixed rule.
    Strict,
    /// Non-blank after trimming and contains `@`.
    Coarse,
}

impl EmailRule {
    pub fn accepts(self, email: &str) -> bool {
        match self {
            Self::Strict => STRICT_EMAIL.is_match(email),
            Self::Coarse => {
                let email = email.trim();
                !email.is_empty() && email.contains('@')
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpFlowConfig {
    pub digits: usize,
    pub email_rule: EmailRule,
    pub resend_countdown_secs: u32,
}

impl Default for OtpFlowConfig {
    fn default() -> Self {
        Self {
            digits: 6,
            email_rule: EmailRule::Strict,
            resend_countdown_secs: DEFAULT_COUNTDOWN_SECS,
        }
    }
}

impl OtpFlowConfig {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            digits: settings.otp_digits.max(1),
            email_rule: EmailRule::Strict,
            resend_countdown_secs: settings.resend_countdown_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoginState {
    #[default]
    Idle,
    Loading,
    CodeSent,
    Verified,
    Error(String),
}

/// Fixed-width code entry. Slot position is the box index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpState {
    digits: Vec<Option<char>>,
}

impl OtpState {
    pub fn new(len: usize) -> Self {
        Self {
            digits: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    /// Every box is empty.
    pub fn is_blank(&self) -> bool {
        self.digits.iter().all(Option::is_none)
    }

    pub fn is_complete(&self) -> bool {
        self.digits.iter().all(Option::is_some)
    }

    pub fn digit(&self, index: usize) -> Option<char> {
        self.digits.get(index).copied().flatten()
    }

    pub fn digits(&self) -> &[Option<char>] {
        &self.digits
    }

    pub fn value(&self) -> String {
        self.digits.iter().flatten().collect()
    }

    /// Returns false for an out-of-range index, leaving the state untouched.
    fn set(&mut self, index: usize, digit: Option<char>) -> bool {
        match self.digits.get_mut(index) {
            Some(slot) => {
                *slot = digit;
                true
            }
            None => false,
        }
    }
}

impl Default for OtpState {
    fn default() -> Self {
        Self::new(OtpFlowConfig::default().digits)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpSnapshot {
    pub email: String,
    pub otp: OtpState,
    pub login: LoginState,
}

pub struct OtpSession {
    gateway: Arc<dyn BackendGateway>,
    config: OtpFlowConfig,
    gateway_timeout: Duration,
    state: StateCell<OtpSnapshot>,
    timer: TimerService,
}

impl OtpSession {
    pub fn new(gateway: Arc<dyn BackendGateway>, settings: &ClientSettings) -> Self {
        Self::with_config(
            gateway,
            OtpFlowConfig::from_settings(settings),
            settings.gateway_timeout(),
        )
    }

    pub fn with_config(
        gateway: Arc<dyn BackendGateway>,
        config: OtpFlowConfig,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            config,
            gateway_timeout,
            state: StateCell::new(OtpSnapshot {
                email: String::new(),
                otp: OtpState::new(config.digits),
                login: LoginState::Idle,
            }),
            timer: TimerService::new(),
        }
    }

    pub fn config(&self) -> OtpFlowConfig {
        self.config
    }

    pub fn snapshot(&self) -> OtpSnapshot {
        self.state.get()
    }

    pub fn login_state(&self) -> LoginState {
        self.state.get().login
    }

    pub fn otp_state(&self) -> OtpState {
        self.state.get().otp
    }

    pub fn email(&self) -> String {
        self.state.get().email
    }

    pub fn timer_state(&self) -> TimerState {
        self.timer.state()
    }

    pub fn timer(&self) -> &TimerService {
        &self.timer
    }

    pub fn subscribe(&self) -> watch::Receiver<OtpSnapshot> {
        self.state.subscribe()
    }

    pub fn subscribe_timer(&self) -> watch::Receiver<TimerState> {
        self.timer.subscribe()
    }

    pub fn update_email(&self, email: impl Into<String>) {
        let email = email.into();
        self.state.update(|s| s.email = email);
    }

    pub fn is_valid_email(&self) -> bool {
        self.config.email_rule.accepts(&self.state.get().email)
    }

    pub async fn send_otp(&self) {
        if !self.is_valid_email() {
            debug!("otp: rejected email before requesting a code");
            self.set_login(LoginState::Error(INVALID_EMAIL_MESSAGE.into()));
            return;
        }
        self.request_code(SEND_FAILED_MESSAGE).await;
    }

    /// No-op until the resend countdown has finished.
    pub async fn resend_otp(&self) {
        if !self.timer.state().enabled {
            debug!("otp: resend ignored while countdown is running");
            return;
        }
        self.request_code(RESEND_FAILED_MESSAGE).await;
    }

    /// Stores the first character of `input` in box `index`; empty input
    /// empties the box. Filling the last empty box triggers verification.
    pub async fn update_otp_digit(&self, index: usize, input: &str) {
        if index >= self.config.digits {
            return;
        }

        let digit = input.chars().next();
        let mut completed = false;
        self.state.update(|s| {
            let was_complete = s.otp.is_complete();
            s.otp.set(index, digit);
            completed = !was_complete && s.otp.is_complete();
        });

        if completed {
            self.verify_otp().await;
        }
    }

    pub fn clear_otp_digit(&self, index: usize) {
        if index >= self.config.digits {
            return;
        }
        self.state.update(|s| {
            s.otp.set(index, None);
        });
    }

    /// Back to the start of the flow: idle, empty boxes, countdown stopped.
    pub fn reset_to_initial(&self) {
        let digits = self.config.digits;
        self.state.update(|s| {
            s.login = LoginState::Idle;
            s.otp = OtpState::new(digits);
        });
        self.timer.reset();
    }

    async fn request_code(&self, fallback: &str) {
        let email = self.state.get().email;
        self.set_login(LoginState::Loading);

        match bounded(
            self.gateway_timeout,
            self.gateway.send_verification_code(&email),
        )
        .await
        {
            Ok(()) => {
                info!(email = %email, "otp: verification code sent");
                self.set_login(LoginState::CodeSent);
                self.timer.start(self.config.resend_countdown_secs);
            }
            Err(err) => {
                warn!(email = %email, "otp: sending verification code failed: {err}");
                self.set_login(LoginState::Error(err.user_message(fallback)));
            }
        }
    }

    async fn verify_otp(&self) {
        let code = self.state.get().otp.value();
        self.set_login(LoginState::Loading);

        match bounded(self.gateway_timeout, self.gateway.verify_code(&code)).await {
            Ok(()) => {
                info!("otp: code verified");
                self.set_login(LoginState::Verified);
                self.timer.stop();
            }
            Err(err) => {
                warn!("otp: verification failed: {err}");
                let digits = self.config.digits;
                let message = err.user_message(INVALID_OTP_MESSAGE);
                self.state.update(|s| {
                    s.login = LoginState::Error(message);
                    s.otp = OtpState::new(digits);
                });
            }
        }
    }

    fn set_login(&self, login: LoginState) {
        self.state.update(|s| s.login = login);
    }
}

#[cfg(test)]
#[path = "tests/otp_session_tests.rs"]
mod tests;
