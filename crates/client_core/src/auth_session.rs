use std::{sync::Arc, time::Duration};

use chrono::Utc;
use shared::domain::CustomerId;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    config::{ClientSettings, CustomerIdScheme},
    error::bounded,
    otp_session::{EmailRule, INVALID_EMAIL_MESSAGE, INVALID_OTP_MESSAGE},
    state::StateCell,
    BackendGateway,
};

const BLANK_OTP_MESSAGE: &str = "Please enter the OTP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    EmailInput,
    OtpInput,
    Loading,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub email: String,
    /// The code the backend issued, kept for display in demo builds.
    pub generated_otp: String,
    /// Only set once the customer record has been saved.
    pub customer_id: Option<CustomerId>,
    pub error_message: Option<String>,
}

/// Email + backend-generated code login that ends with a persisted customer
/// record. Uses the coarse email check, unlike [`crate::OtpSession`].
pub struct AuthSession {
    gateway: Arc<dyn BackendGateway>,
    gateway_timeout: Duration,
    customer_id_scheme: CustomerIdScheme,
    state: StateCell<AuthSnapshot>,
}

impl AuthSession {
    pub fn new(gateway: Arc<dyn BackendGateway>, settings: &ClientSettings) -> Self {
        Self {
            gateway,
            gateway_timeout: settings.gateway_timeout(),
            customer_id_scheme: settings.customer_id_scheme,
            state: StateCell::default(),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.get()
    }

    pub fn auth_state(&self) -> AuthState {
        self.state.get().state
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.state.get().customer_id
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.get().error_message
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    pub fn update_email(&self, email: impl Into<String>) {
        let email = email.into();
        self.state.update(|s| {
            s.email = email;
            s.error_message = None;
        });
    }

    pub fn clear_error(&self) {
        self.state.update_if(|s| s.error_message.take().is_some());
    }

    pub async fn request_otp(&self) {
        let email = self.state.get().email.trim().to_string();
        if !EmailRule::Coarse.accepts(&email) {
            self.state
                .update(|s| s.error_message = Some(INVALID_EMAIL_MESSAGE.into()));
            return;
        }

        self.state.update(|s| {
            s.email = email.clone();
            s.state = AuthState::Loading;
            s.error_message = None;
        });

        match bounded(self.gateway_timeout, self.gateway.generate_code(&email)).await {
            Ok(code) => {
                info!(email = %email, "auth: code issued");
                self.state.update(|s| {
                    s.generated_otp = code;
                    s.state = AuthState::OtpInput;
                    s.error_message = None;
                });
            }
            Err(err) => {
                warn!(email = %email, "auth: code request failed: {err}");
                self.state.update(|s| {
                    s.error_message = Some(format!("Failed to send OTP: {err}"));
                    s.state = AuthState::EmailInput;
                });
            }
        }
    }

    pub async fn verify_otp(&self, entered: &str) {
        if entered.trim().is_empty() {
            self.state
                .update(|s| s.error_message = Some(BLANK_OTP_MESSAGE.into()));
            return;
        }

        let email = self.state.get().email;
        self.state.update(|s| {
            s.state = AuthState::Loading;
            s.error_message = None;
        });

        let valid = match bounded(
            self.gateway_timeout,
            self.gateway.verify_email_code(&email, entered),
        )
        .await
        {
            Ok(valid) => valid,
            Err(err) => {
                warn!(email = %email, "auth: verification failed: {err}");
                self.fail_to_otp_input(format!("Verification failed: {err}"));
                return;
            }
        };

        if !valid {
            self.fail_to_otp_input(INVALID_OTP_MESSAGE.into());
            return;
        }

        let customer_id = generate_customer_id(
            &email,
            self.customer_id_scheme,
            Utc::now().timestamp_millis(),
        );
        match bounded(
            self.gateway_timeout,
            self.gateway.save_customer(&customer_id, &email),
        )
        .await
        {
            Ok(()) => {
                info!(customer_id = %customer_id, "auth: customer authenticated");
                self.state.update(|s| {
                    s.customer_id = Some(customer_id);
                    s.state = AuthState::Authenticated;
                    s.error_message = None;
                });
            }
            Err(err) => {
                warn!(customer_id = %customer_id, "auth: saving customer failed: {err}");
                self.fail_to_otp_input(format!("Failed to save customer data: {err}"));
            }
        }
    }

    pub fn logout(&self) {
        self.state.set(AuthSnapshot::default());
    }

    fn fail_to_otp_input(&self, message: String) {
        self.state.update(|s| {
            s.error_message = Some(message);
            s.state = AuthState::OtpInput;
        });
    }
}

/// `customer_<local part, dots as underscores>_<millis>`, with a random
/// suffix under [`CustomerIdScheme::Unique`].
pub fn generate_customer_id(email: &str, scheme: CustomerIdScheme, now_millis: i64) -> CustomerId {
    let local = email.split('@').next().unwrap_or_default().replace('.', "_");
    let base = format!("customer_{local}_{now_millis}");
    match scheme {
        CustomerIdScheme::Timestamp => CustomerId(base),
        CustomerIdScheme::Unique => {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            CustomerId(format!("{base}_{}", &suffix[..8]))
        }
    }
}

#[cfg(test)]
#[path = "tests/auth_session_tests.rs"]
mod tests;
