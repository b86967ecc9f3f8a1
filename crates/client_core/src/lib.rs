use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::{
    domain::{BookingId, CustomerId, Location, LocationId},
    protocol::{apply_location_overrides, BookingRecord},
};
use tracing::warn;

pub mod auth_session;
pub mod booking;
pub mod config;
pub mod error;
mod local_gateway;
pub mod otp_session;
pub mod state;
pub mod timer;

pub use auth_session::{generate_customer_id, AuthSession, AuthSnapshot, AuthState};
pub use booking::{map_booking_status, BookingController, BookingSnapshot, BookingState, LocationsState};
pub use config::{load_settings, ClientSettings, CustomerIdScheme};
pub use error::ClientError;
pub use local_gateway::{LocalBackendGateway, DEMO_VERIFICATION_CODE, ISSUED_OTP_CODE};
pub use otp_session::{EmailRule, LoginState, OtpFlowConfig, OtpSession, OtpSnapshot, OtpState};
pub use state::StateCell;
pub use timer::{TimerService, TimerState};

/// Push stream of raw status strings for one booking. Ends when the backend
/// closes it; dropping it unsubscribes.
pub type BookingStatusStream = BoxStream<'static, Result<String>>;

/// Everything the controllers need from the backend. Implementations own
/// transport and storage; failures come back as `anyhow` errors and are turned
/// into state by the caller.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn send_verification_code(&self, email: &str) -> Result<()>;
    async fn verify_code(&self, code: &str) -> Result<()>;
    async fn generate_code(&self, email: &str) -> Result<String>;
    async fn verify_email_code(&self, email: &str, entered: &str) -> Result<bool>;
    async fn save_customer(&self, customer_id: &CustomerId, email: &str) -> Result<()>;
    async fn fetch_location_overrides(&self) -> Result<HashMap<LocationId, bool>>;

    /// The fixed catalog with active flags applied. An override fetch failure
    /// is absorbed: the static catalog is returned as-is.
    async fn fetch_location_catalog(&self) -> Result<Vec<Location>> {
        match self.fetch_location_overrides().await {
            Ok(overrides) => Ok(apply_location_overrides(&overrides)),
            Err(err) => {
                warn!("gateway: location overrides unavailable, using static catalog: {err}");
                Ok(Location::catalog())
            }
        }
    }

    async fn create_booking(
        &self,
        customer_id: &CustomerId,
        location_id: &LocationId,
    ) -> Result<BookingId>;
    async fn subscribe_booking_status(&self, booking_id: &BookingId)
        -> Result<BookingStatusStream>;
    async fn fetch_booking(&self, booking_id: &BookingId) -> Result<BookingRecord>;
    async fn fetch_customer_bookings(&self, customer_id: &CustomerId)
        -> Result<Vec<BookingRecord>>;
}

pub struct MissingBackendGateway;

#[async_trait]
impl BackendGateway for MissingBackendGateway {
    async fn send_verification_code(&self, _email: &str) -> Result<()> {
        Err(anyhow!("backend gateway is unavailable"))
    }

    async fn verify_code(&self, _code: &str) -> Result<()> {
        Err(anyhow!("backend gateway is unavailable"))
    }

    async fn generate_code(&self, _email: &str) -> Result<String> {
        Err(anyhow!("backend gateway is unavailable"))
    }

    async fn verify_email_code(&self, _email: &str, _entered: &str) -> Result<bool> {
        Err(anyhow!("backend gateway is unavailable"))
    }

    async fn save_customer(&self, _customer_id: &CustomerId, _email: &str) -> Result<()> {
        Err(anyhow!("backend gateway is unavailable"))
    }

    async fn fetch_location_overrides(&self) -> Result<HashMap<LocationId, bool>> {
        Err(anyhow!("backend gateway is unavailable"))
    }

    async fn create_booking(
        &self,
        _customer_id: &CustomerId,
        _location_id: &LocationId,
    ) -> Result<BookingId> {
        Err(anyhow!("backend gateway is unavailable"))
    }

    async fn subscribe_booking_status(
        &self,
        booking_id: &BookingId,
    ) -> Result<BookingStatusStream> {
        Err(anyhow!(
            "backend gateway is unavailable for booking {booking_id}"
        ))
    }

    async fn fetch_booking(&self, booking_id: &BookingId) -> Result<BookingRecord> {
        Err(anyhow!(
            "backend gateway is unavailable for booking {booking_id}"
        ))
    }

    async fn fetch_customer_bookings(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<BookingRecord>> {
        Err(anyhow!(
            "backend gateway is unavailable for customer {customer_id}"
        ))
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
