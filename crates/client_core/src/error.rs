use std::time::Duration;

use shared::error::{ApiException, ErrorCode};
use thiserror::Error;

/// Failures a controller can observe. None of these escape to observers; they
/// are folded into the relevant `Error` state as a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Rejected locally before any gateway call.
    #[error("{0}")]
    Validation(String),
    /// Transport or backend failure.
    #[error("{0}")]
    Gateway(String),
    /// The backend answered, but the answer is a domain-level refusal
    /// (wrong code, unknown status).
    #[error("{0}")]
    BusinessRule(String),
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ClientError {
    pub fn from_gateway(err: anyhow::Error) -> Self {
        if let Some(api) = err.downcast_ref::<ApiException>() {
            return match api.code {
                ErrorCode::InvalidCode => Self::BusinessRule(api.message.clone()),
                ErrorCode::NotFound => Self::Gateway(api.message.clone()),
            };
        }
        Self::Gateway(err.to_string())
    }

    /// The message to show, or `fallback` when the failure carried none.
    pub fn user_message(&self, fallback: &str) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            fallback.to_string()
        } else {
            message
        }
    }
}

/// Runs a gateway call under `timeout`, classifying whatever comes back.
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, ClientError>
where
    F: std::future::Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ClientError::from_gateway(err)),
        Err(_) => Err(ClientError::Timeout(timeout)),
    }
}
