use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use shared::{
    domain::{BookingId, CustomerId, LocationId},
    error::{ApiException, ErrorCode},
    protocol::{BookingRecord, Customer},
};
use storage::Storage;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{info, warn};

use crate::{BackendGateway, BookingStatusStream};

/// Code accepted by [`BackendGateway::verify_code`] on the local backend.
pub const DEMO_VERIFICATION_CODE: &str = "123456";
/// Code issued by [`BackendGateway::generate_code`] on the local backend.
pub const ISSUED_OTP_CODE: &str = "1234";

const STATUS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StatusChange {
    booking_id: BookingId,
    status: String,
}

/// Storage-backed gateway for development and tests. Status pushes only reach
/// subscribers in the same process.
pub struct LocalBackendGateway {
    store: Storage,
    status_changes: broadcast::Sender<StatusChange>,
}

impl LocalBackendGateway {
    pub async fn initialize(database_url: &str) -> Result<Arc<Self>> {
        let store = Storage::new(database_url)
            .await
            .with_context(|| format!("failed to initialize booking storage at '{database_url}'"))?;
        Ok(Arc::new(Self::from_storage(store)))
    }

    pub fn from_storage(store: Storage) -> Self {
        let (status_changes, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            store,
            status_changes,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.store
    }

    /// Persists `status` and pushes it to live subscribers of this booking.
    pub async fn update_booking_status(&self, booking_id: &BookingId, status: &str) -> Result<()> {
        if !self.store.update_booking_status(booking_id, status).await? {
            return Err(ApiException::new(
                ErrorCode::NotFound,
                format!("booking {booking_id} not found"),
            )
            .into());
        }
        info!(booking_id = %booking_id, status, "local backend: booking status changed");
        let _ = self.status_changes.send(StatusChange {
            booking_id: booking_id.clone(),
            status: status.to_string(),
        });
        Ok(())
    }

    pub async fn set_location_active(&self, location_id: &LocationId, is_active: bool) -> Result<()> {
        self.store.set_location_active(location_id, is_active).await
    }

    /// Last address a verification code was sent to.
    pub async fn last_email(&self) -> Result<Option<String>> {
        self.store.last_email().await
    }
}

#[async_trait]
impl BackendGateway for LocalBackendGateway {
    async fn send_verification_code(&self, email: &str) -> Result<()> {
        self.store.remember_email(email).await?;
        info!(email, "local backend: verification code sent");
        Ok(())
    }

    async fn verify_code(&self, code: &str) -> Result<()> {
        if code == DEMO_VERIFICATION_CODE {
            Ok(())
        } else {
            Err(ApiException::new(ErrorCode::InvalidCode, "Invalid OTP. Please try again.").into())
        }
    }

    async fn generate_code(&self, email: &str) -> Result<String> {
        self.store.store_otp(email, ISSUED_OTP_CODE).await?;
        Ok(ISSUED_OTP_CODE.to_string())
    }

    async fn verify_email_code(&self, email: &str, entered: &str) -> Result<bool> {
        self.store.verify_otp(email, entered).await
    }

    async fn save_customer(&self, customer_id: &CustomerId, email: &str) -> Result<()> {
        self.store
            .save_customer(&Customer {
                customer_id: customer_id.clone(),
                email: email.to_string(),
            })
            .await
    }

    async fn fetch_location_overrides(&self) -> Result<HashMap<LocationId, bool>> {
        self.store.location_overrides().await
    }

    async fn create_booking(
        &self,
        customer_id: &CustomerId,
        location_id: &LocationId,
    ) -> Result<BookingId> {
        self.store.create_booking(customer_id, location_id).await
    }

    /// Emits the stored status first, then every change made through
    /// [`LocalBackendGateway::update_booking_status`]. A lagging subscriber
    /// gets the stored status again in place of the changes it missed.
    async fn subscribe_booking_status(
        &self,
        booking_id: &BookingId,
    ) -> Result<BookingStatusStream> {
        // Subscribe before reading so a change racing the read is not lost.
        let changes = self.status_changes.subscribe();
        let current = self.fetch_booking(booking_id).await?;

        let watched = booking_id.clone();
        let store = self.store.clone();
        let updates = BroadcastStream::new(changes).filter_map(move |change| {
            let watched = watched.clone();
            let store = store.clone();
            async move {
                match change {
                    Ok(change) if change.booking_id == watched => {
                        Some(Ok::<_, anyhow::Error>(change.status))
                    }
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(booking_id = %watched, skipped, "local backend: status subscriber lagged, re-reading stored status");
                        Some(resync_status(&store, &watched).await)
                    }
                }
            }
        });

        Ok(stream::once(async move { Ok::<_, anyhow::Error>(current.status) })
            .chain(updates)
            .boxed())
    }

    async fn fetch_booking(&self, booking_id: &BookingId) -> Result<BookingRecord> {
        self.store.load_booking(booking_id).await?.ok_or_else(|| {
            ApiException::new(ErrorCode::NotFound, format!("booking {booking_id} not found")).into()
        })
    }

    async fn fetch_customer_bookings(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<BookingRecord>> {
        self.store.list_customer_bookings(customer_id).await
    }
}

async fn resync_status(store: &Storage, booking_id: &BookingId) -> Result<String> {
    store
        .load_booking(booking_id)
        .await?
        .map(|booking| booking.status)
        .ok_or_else(|| {
            ApiException::new(ErrorCode::NotFound, format!("booking {booking_id} not found")).into()
        })
}

#[cfg(test)]
#[path = "tests/local_gateway_tests.rs"]
mod tests;
