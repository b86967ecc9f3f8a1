use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::{BookingId, CustomerId, LocationId},
    error::{ApiException, ErrorCode},
    protocol::BookingRecord,
};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{BackendGateway, BookingStatusStream};

pub(crate) type StatusSender = mpsc::UnboundedSender<std::result::Result<String, String>>;

/// Gateway double with canned answers and a call log.
pub(crate) struct ScriptedGateway {
    pub delay: Option<Duration>,
    pub fail_send: Option<String>,
    pub accepted_code: String,
    pub generated_code: String,
    pub fail_generate: Option<String>,
    pub email_code_valid: bool,
    pub fail_verify_email: Option<String>,
    pub fail_save: Option<String>,
    pub overrides: Option<HashMap<LocationId, bool>>,
    pub fail_create: Option<String>,
    pub fail_subscribe: Option<String>,
    pub bookings: Vec<BookingRecord>,
    pub calls: Mutex<Vec<String>>,
    pub status_senders: Mutex<Vec<(BookingId, StatusSender)>>,
    pub next_booking: AtomicUsize,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self {
            delay: None,
            fail_send: None,
            accepted_code: "123456".into(),
            generated_code: "1234".into(),
            fail_generate: None,
            email_code_valid: true,
            fail_verify_email: None,
            fail_save: None,
            overrides: Some(HashMap::new()),
            fail_create: None,
            fail_subscribe: None,
            bookings: Vec::new(),
            calls: Mutex::new(Vec::new()),
            status_senders: Mutex::new(Vec::new()),
            next_booking: AtomicUsize::new(1),
        }
    }
}

impl ScriptedGateway {
    async fn record(&self, call: impl Into<String>) {
        self.calls.lock().await.push(call.into());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn calls_named(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub async fn sender_for(&self, booking_id: &str) -> StatusSender {
        self.status_senders
            .lock()
            .await
            .iter()
            .rev()
            .find(|(id, _)| id.as_str() == booking_id)
            .map(|(_, tx)| tx.clone())
            .expect("booking was subscribed")
    }

    pub async fn push_status(&self, booking_id: &str, status: &str) {
        let _ = self.sender_for(booking_id).await.send(Ok(status.to_string()));
    }

    pub async fn push_error(&self, booking_id: &str, message: &str) {
        let _ = self
            .sender_for(booking_id)
            .await
            .send(Err(message.to_string()));
    }

    pub async fn subscription_closed(&self, booking_id: &str) -> bool {
        self.sender_for(booking_id).await.is_closed()
    }
}

fn fail(message: &Option<String>) -> Result<()> {
    match message {
        Some(message) => Err(anyhow!(message.clone())),
        None => Ok(()),
    }
}

#[async_trait]
impl BackendGateway for ScriptedGateway {
    async fn send_verification_code(&self, email: &str) -> Result<()> {
        self.record(format!("send:{email}")).await;
        fail(&self.fail_send)
    }

    async fn verify_code(&self, code: &str) -> Result<()> {
        self.record(format!("verify:{code}")).await;
        if code == self.accepted_code {
            Ok(())
        } else {
            Err(ApiException::new(ErrorCode::InvalidCode, "Invalid OTP. Please try again.").into())
        }
    }

    async fn generate_code(&self, email: &str) -> Result<String> {
        self.record(format!("generate:{email}")).await;
        fail(&self.fail_generate)?;
        Ok(self.generated_code.clone())
    }

    async fn verify_email_code(&self, email: &str, entered: &str) -> Result<bool> {
        self.record(format!("verify_email:{email}:{entered}")).await;
        fail(&self.fail_verify_email)?;
        Ok(self.email_code_valid && entered == self.generated_code)
    }

    async fn save_customer(&self, customer_id: &CustomerId, email: &str) -> Result<()> {
        self.record(format!("save:{customer_id}:{email}")).await;
        fail(&self.fail_save)
    }

    async fn fetch_location_overrides(&self) -> Result<HashMap<LocationId, bool>> {
        self.record("overrides").await;
        self.overrides
            .clone()
            .ok_or_else(|| anyhow!("permission denied on activeLocations"))
    }

    async fn create_booking(
        &self,
        customer_id: &CustomerId,
        location_id: &LocationId,
    ) -> Result<BookingId> {
        self.record(format!("create:{customer_id}:{location_id}")).await;
        fail(&self.fail_create)?;
        let n = self.next_booking.fetch_add(1, Ordering::SeqCst);
        Ok(BookingId(format!("b{n}")))
    }

    async fn subscribe_booking_status(
        &self,
        booking_id: &BookingId,
    ) -> Result<BookingStatusStream> {
        self.record(format!("subscribe:{booking_id}")).await;
        fail(&self.fail_subscribe)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.status_senders
            .lock()
            .await
            .push((booking_id.clone(), tx));
        Ok(UnboundedReceiverStream::new(rx)
            .map(|item| item.map_err(anyhow::Error::msg))
            .boxed())
    }

    async fn fetch_booking(&self, booking_id: &BookingId) -> Result<BookingRecord> {
        self.record(format!("fetch:{booking_id}")).await;
        self.bookings
            .iter()
            .find(|b| &b.booking_id == booking_id)
            .cloned()
            .ok_or_else(|| anyhow!("booking {booking_id} not found"))
    }

    async fn fetch_customer_bookings(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<BookingRecord>> {
        self.record(format!("history:{customer_id}")).await;
        Ok(self
            .bookings
            .iter()
            .filter(|b| &b.customer_id == customer_id)
            .cloned()
            .collect())
    }
}
