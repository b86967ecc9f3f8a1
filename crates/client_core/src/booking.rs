use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures::StreamExt;
use shared::{
    domain::{BookingId, BookingStatus, CustomerId, Location},
    protocol::{sort_newest_first, BookingRecord},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    config::ClientSettings,
    error::{bounded, ClientError},
    state::StateCell,
    BackendGateway, BookingStatusStream,
};

const CREATE_FAILED_MESSAGE: &str = "Failed to create booking";
const LOCATIONS_FAILED_MESSAGE: &str = "Failed to load locations";
const SUBSCRIBE_FAILED_MESSAGE: &str = "Failed to follow booking status";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BookingState {
    #[default]
    Idle,
    Pending,
    Accepted,
    Rejected,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LocationsState {
    #[default]
    Loading,
    Success(Vec<Location>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookingSnapshot {
    pub state: BookingState,
    /// Survives booking state changes and resets.
    pub selected_location: Option<Location>,
    pub current_booking_id: Option<BookingId>,
}

/// Maps a pushed status string. Total: anything but the three known values
/// is an error state.
pub fn map_booking_status(status: &str) -> BookingState {
    match BookingStatus::parse(status) {
        Some(BookingStatus::Pending) => BookingState::Pending,
        Some(BookingStatus::Accepted) => BookingState::Accepted,
        Some(BookingStatus::Rejected) => BookingState::Rejected,
        None => BookingState::Error(format!("Unknown status: {status}")),
    }
}

/// Submits bookings and follows their status. At most one status subscription
/// is live; submissions and resets bump a generation counter and any write
/// from an older generation is dropped under the state lock.
pub struct BookingController {
    gateway: Arc<dyn BackendGateway>,
    gateway_timeout: Duration,
    terminal_reset_delay: Duration,
    bookings: StateCell<BookingSnapshot>,
    locations: StateCell<LocationsState>,
    generation: Arc<AtomicU64>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl BookingController {
    pub fn new(gateway: Arc<dyn BackendGateway>, settings: &ClientSettings) -> Self {
        Self {
            gateway,
            gateway_timeout: settings.gateway_timeout(),
            terminal_reset_delay: settings.terminal_reset_delay(),
            bookings: StateCell::default(),
            locations: StateCell::default(),
            generation: Arc::new(AtomicU64::new(0)),
            subscription: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> BookingSnapshot {
        self.bookings.get()
    }

    pub fn booking_state(&self) -> BookingState {
        self.bookings.get().state
    }

    pub fn current_booking_id(&self) -> Option<BookingId> {
        self.bookings.get().current_booking_id
    }

    pub fn locations_state(&self) -> LocationsState {
        self.locations.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<BookingSnapshot> {
        self.bookings.subscribe()
    }

    pub fn subscribe_locations(&self) -> watch::Receiver<LocationsState> {
        self.locations.subscribe()
    }

    pub fn has_active_subscription(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn load_locations(&self) {
        self.locations.set(LocationsState::Loading);
        match bounded(self.gateway_timeout, self.gateway.fetch_location_catalog()).await {
            Ok(locations) => {
                debug!(count = locations.len(), "booking: locations loaded");
                self.locations.set(LocationsState::Success(locations));
            }
            Err(err) => {
                warn!("booking: loading locations failed: {err}");
                self.locations
                    .set(LocationsState::Error(err.user_message(LOCATIONS_FAILED_MESSAGE)));
            }
        }
    }

    pub fn select_location(&self, location: Location) {
        self.bookings.update(|s| s.selected_location = Some(location));
    }

    pub fn clear_selected_location(&self) {
        self.bookings.update(|s| s.selected_location = None);
    }

    /// No-op without a selected location. Replaces any booking in flight.
    pub async fn submit_booking(&self, customer_id: &CustomerId) {
        let Some(location) = self.bookings.get().selected_location else {
            debug!("booking: submit ignored, no location selected");
            return;
        };

        let generation = self.begin(BookingState::Pending);
        info!(customer_id = %customer_id, location = %location.id, "booking: submitting");

        let booking_id = match bounded(
            self.gateway_timeout,
            self.gateway.create_booking(customer_id, &location.id),
        )
        .await
        {
            Ok(booking_id) => booking_id,
            Err(err) => {
                warn!(customer_id = %customer_id, "booking: create failed: {err}");
                let message = err.user_message(CREATE_FAILED_MESSAGE);
                self.apply(generation, |s| s.state = BookingState::Error(message));
                return;
            }
        };

        let stored = self.apply(generation, |s| {
            s.current_booking_id = Some(booking_id.clone());
        });
        if !stored {
            debug!(booking_id = %booking_id, "booking: superseded before subscribing");
            return;
        }

        let stream = match bounded(
            self.gateway_timeout,
            self.gateway.subscribe_booking_status(&booking_id),
        )
        .await
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(booking_id = %booking_id, "booking: status subscription failed: {err}");
                let message = err.user_message(SUBSCRIBE_FAILED_MESSAGE);
                self.apply(generation, |s| s.state = BookingState::Error(message));
                return;
            }
        };

        self.attach_subscription(generation, booking_id, stream);
    }

    /// Back to idle, booking id cleared, status subscription torn down.
    /// The selected location is kept.
    pub fn reset_booking_state(&self) {
        self.begin(BookingState::Idle);
    }

    pub async fn fetch_booking(&self, booking_id: &BookingId) -> Result<BookingRecord, ClientError> {
        bounded(self.gateway_timeout, self.gateway.fetch_booking(booking_id)).await
    }

    /// Newest first.
    pub async fn customer_bookings(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<BookingRecord>, ClientError> {
        let mut bookings = bounded(
            self.gateway_timeout,
            self.gateway.fetch_customer_bookings(customer_id),
        )
        .await?;
        sort_newest_first(&mut bookings);
        Ok(bookings)
    }

    /// Tears down the live subscription and opens a new generation in `state`
    /// with no booking id.
    fn begin(&self, state: BookingState) -> u64 {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = subscription.take() {
            task.abort();
            debug!("booking: status subscription torn down");
        }

        let mut generation = 0;
        self.bookings.update(|s| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            s.state = state;
            s.current_booking_id = None;
        });
        generation
    }

    fn apply(&self, generation: u64, modify: impl FnOnce(&mut BookingSnapshot)) -> bool {
        apply_if_current(&self.bookings, &self.generation, generation, modify)
    }

    fn attach_subscription(&self, generation: u64, booking_id: BookingId, stream: BookingStatusStream) {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(booking_id = %booking_id, "booking: superseded before subscribing");
            return;
        }

        let follower = StatusFollower {
            bookings: self.bookings.clone(),
            generation: Arc::clone(&self.generation),
            owned: generation,
            booking_id,
            terminal_reset_delay: self.terminal_reset_delay,
        };
        *subscription = Some(tokio::spawn(follower.run(stream)));
    }
}

impl Drop for BookingController {
    fn drop(&mut self) {
        if let Some(task) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

fn apply_if_current(
    bookings: &StateCell<BookingSnapshot>,
    generation: &AtomicU64,
    owned: u64,
    modify: impl FnOnce(&mut BookingSnapshot),
) -> bool {
    bookings.update_if(|s| {
        if generation.load(Ordering::SeqCst) != owned {
            return false;
        }
        modify(s);
        true
    })
}

struct StatusFollower {
    bookings: StateCell<BookingSnapshot>,
    generation: Arc<AtomicU64>,
    owned: u64,
    booking_id: BookingId,
    terminal_reset_delay: Duration,
}

impl StatusFollower {
    fn apply(&self, modify: impl FnOnce(&mut BookingSnapshot)) -> bool {
        apply_if_current(&self.bookings, &self.generation, self.owned, modify)
    }

    async fn run(self, mut stream: BookingStatusStream) {
        while let Some(item) = stream.next().await {
            let status = match item {
                Ok(status) => status,
                Err(err) => {
                    warn!(booking_id = %self.booking_id, "booking: status stream failed: {err}");
                    let message = err.to_string();
                    self.apply(|s| s.state = BookingState::Error(message));
                    return;
                }
            };

            let next = map_booking_status(&status);
            info!(booking_id = %self.booking_id, status = %status, "booking: status pushed");
            let terminal = matches!(next, BookingState::Accepted | BookingState::Rejected);
            let failed = matches!(next, BookingState::Error(_));
            if !self.apply(|s| s.state = next) {
                return;
            }

            if failed {
                return;
            }

            if terminal {
                drop(stream);
                tokio::time::sleep(self.terminal_reset_delay).await;
                self.apply(|s| {
                    s.state = BookingState::Idle;
                    s.current_booking_id = None;
                });
                debug!(booking_id = %self.booking_id, "booking: auto-reset after terminal status");
                return;
            }
        }
        debug!(booking_id = %self.booking_id, "booking: status stream ended");
    }
}

#[cfg(test)]
#[path = "tests/booking_tests.rs"]
mod tests;
