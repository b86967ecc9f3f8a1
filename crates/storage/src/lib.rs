use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{BookingId, BookingStatus, CustomerId, LocationId},
    protocol::{BookingRecord, Customer},
};

const LAST_EMAIL_PREF: &str = "last_email";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOtp {
    pub code: String,
    pub issued_at_ms: i64,
    pub verified: bool,
}

/// OTP rows are keyed by the email with dots replaced, matching the key shape
/// the hosted backend uses for its `otps` node.
pub fn otp_email_key(email: &str) -> String {
    email.replace('.', "_")
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `:memory:` opens its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn save_customer(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            "INSERT INTO customers (customer_id, email) VALUES (?, ?)
             ON CONFLICT(customer_id) DO UPDATE SET email = excluded.email",
        )
        .bind(customer.customer_id.as_str())
        .bind(&customer.email)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save customer {}", customer.customer_id))?;
        Ok(())
    }

    pub async fn load_customer(&self, customer_id: &CustomerId) -> Result<Option<Customer>> {
        let row = sqlx::query("SELECT customer_id, email FROM customers WHERE customer_id = ?")
            .bind(customer_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Customer {
            customer_id: CustomerId(r.get::<String, _>(0)),
            email: r.get::<String, _>(1),
        }))
    }

    /// Replaces any previous code for this email and resets its verified flag.
    pub async fn store_otp(&self, email: &str, code: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO otp_codes (email_key, code, issued_at_ms, verified) VALUES (?, ?, ?, 0)
             ON CONFLICT(email_key) DO UPDATE SET
                code = excluded.code,
                issued_at_ms = excluded.issued_at_ms,
                verified = 0",
        )
        .bind(otp_email_key(email))
        .bind(code)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store otp for {email}"))?;
        Ok(())
    }

    pub async fn load_otp(&self, email: &str) -> Result<Option<StoredOtp>> {
        let row = sqlx::query(
            "SELECT code, issued_at_ms, verified FROM otp_codes WHERE email_key = ?",
        )
        .bind(otp_email_key(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredOtp {
            code: r.get::<String, _>(0),
            issued_at_ms: r.get::<i64, _>(1),
            verified: r.get::<i64, _>(2) != 0,
        }))
    }

    /// Compares `entered` with the stored code and marks the row verified on a
    /// match. A missing row is a mismatch, not an error.
    pub async fn verify_otp(&self, email: &str, entered: &str) -> Result<bool> {
        let Some(stored) = self.load_otp(email).await? else {
            return Ok(false);
        };
        if stored.code != entered {
            return Ok(false);
        }

        sqlx::query("UPDATE otp_codes SET verified = 1 WHERE email_key = ?")
            .bind(otp_email_key(email))
            .execute(&self.pool)
            .await
            .context("failed to mark otp verified")?;
        Ok(true)
    }

    pub async fn create_booking(
        &self,
        customer_id: &CustomerId,
        location_id: &LocationId,
    ) -> Result<BookingId> {
        self.create_booking_at(customer_id, location_id, Utc::now().timestamp_millis())
            .await
    }

    pub async fn create_booking_at(
        &self,
        customer_id: &CustomerId,
        location_id: &LocationId,
        timestamp_ms: i64,
    ) -> Result<BookingId> {
        let booking_id = BookingId(uuid::Uuid::new_v4().simple().to_string());
        sqlx::query(
            "INSERT INTO bookings (booking_id, customer_id, location_id, status, created_at_ms)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(booking_id.as_str())
        .bind(customer_id.as_str())
        .bind(location_id.as_str())
        .bind(BookingStatus::Pending.as_str())
        .bind(timestamp_ms)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create booking for customer {customer_id}"))?;
        Ok(booking_id)
    }

    /// Returns false when no booking with this id exists.
    pub async fn update_booking_status(&self, booking_id: &BookingId, status: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE bookings SET status = ? WHERE booking_id = ?")
            .bind(status)
            .bind(booking_id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to update status of booking {booking_id}"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn load_booking(&self, booking_id: &BookingId) -> Result<Option<BookingRecord>> {
        let row = sqlx::query(
            "SELECT booking_id, customer_id, location_id, status, created_at_ms
             FROM bookings WHERE booking_id = ?",
        )
        .bind(booking_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(booking_from_row))
    }

    pub async fn list_customer_bookings(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<BookingRecord>> {
        let rows = sqlx::query(
            "SELECT booking_id, customer_id, location_id, status, created_at_ms
             FROM bookings WHERE customer_id = ?
             ORDER BY created_at_ms DESC, rowid DESC",
        )
        .bind(customer_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(booking_from_row).collect())
    }

    pub async fn set_location_active(&self, location_id: &LocationId, is_active: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO location_overrides (location_id, is_active) VALUES (?, ?)
             ON CONFLICT(location_id) DO UPDATE SET is_active = excluded.is_active",
        )
        .bind(location_id.as_str())
        .bind(is_active)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to set active flag for location {location_id}"))?;
        Ok(())
    }

    pub async fn location_overrides(&self) -> Result<HashMap<LocationId, bool>> {
        let rows = sqlx::query("SELECT location_id, is_active FROM location_overrides")
            .fetch_all(&self.pool)
            .await
            .context("failed to load location overrides")?;
        Ok(rows
            .into_iter()
            .map(|r| (LocationId(r.get::<String, _>(0)), r.get::<bool, _>(1)))
            .collect())
    }

    pub async fn remember_email(&self, email: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_prefs (pref_key, pref_value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(pref_key) DO UPDATE SET pref_value = excluded.pref_value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(LAST_EMAIL_PREF)
        .bind(email)
        .execute(&self.pool)
        .await
        .context("failed to remember email")?;
        Ok(())
    }

    pub async fn last_email(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT pref_value FROM auth_prefs WHERE pref_key = ?")
            .bind(LAST_EMAIL_PREF)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }
}

fn booking_from_row(row: &SqliteRow) -> BookingRecord {
    BookingRecord {
        booking_id: BookingId(row.get::<String, _>(0)),
        customer_id: CustomerId(row.get::<String, _>(1)),
        location: LocationId(row.get::<String, _>(2)),
        status: row.get::<String, _>(3),
        timestamp: row.get::<i64, _>(4),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
