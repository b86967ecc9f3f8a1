use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{BookingId, CustomerId, Location, LocationId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: CustomerId,
    pub email: String,
}

/// A booking as stored by the backend. `status` is kept as the raw wire string
/// so unknown values written by other clients survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking_id: BookingId,
    pub customer_id: CustomerId,
    pub location: LocationId,
    pub status: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
}

/// Orders bookings newest first.
pub fn sort_newest_first(bookings: &mut [BookingRecord]) {
    bookings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Applies per-location active flags to the fixed catalog. Locations without
/// an override stay active.
pub fn apply_location_overrides(overrides: &HashMap<LocationId, bool>) -> Vec<Location> {
    Location::catalog()
        .into_iter()
        .map(|mut location| {
            location.is_active = overrides.get(&location.id).copied().unwrap_or(true);
            location
        })
        .collect()
}
