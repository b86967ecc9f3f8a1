use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, AuthSession, AuthState, BackendGateway, BookingController, BookingState,
    ClientSettings, LocalBackendGateway, LocationsState,
};
use shared::domain::{BookingId, BookingStatus, CustomerId, LocationId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Defaults to `database_url` from client.toml / APP__DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    ListBookings {
        customer_id: String,
    },
    ShowBooking {
        booking_id: String,
    },
    /// Writes a status on a booking. Live subscribers in other processes are
    /// not notified.
    SetStatus {
        booking_id: String,
        status: String,
    },
    SetLocationActive {
        location_id: String,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Logs in, books a location and plays the operator decision.
    Demo {
        #[arg(long, default_value = "demo.user@example.com")]
        email: String,
        #[arg(long, default_value = "kolkata")]
        location: String,
        /// `accepted` or `rejected`.
        #[arg(long, default_value = "accepted")]
        decision: String,
        #[arg(long, default_value_t = 1_000)]
        decide_after_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    let backend = LocalBackendGateway::initialize(&settings.database_url).await?;

    match cli.command {
        Command::ListBookings { customer_id } => {
            let customer_id = CustomerId::from(customer_id);
            let mut bookings = backend.fetch_customer_bookings(&customer_id).await?;
            shared::protocol::sort_newest_first(&mut bookings);
            if bookings.is_empty() {
                println!("no bookings for {customer_id}");
            }
            for booking in bookings {
                println!(
                    "{} location={} status={} timestamp={}",
                    booking.booking_id, booking.location, booking.status, booking.timestamp
                );
            }
        }
        Command::ShowBooking { booking_id } => {
            let booking = backend.fetch_booking(&BookingId::from(booking_id)).await?;
            println!(
                "booking_id={} customer_id={} location={} status={} timestamp={}",
                booking.booking_id,
                booking.customer_id,
                booking.location,
                booking.status,
                booking.timestamp
            );
        }
        Command::SetStatus { booking_id, status } => {
            if BookingStatus::parse(&status).is_none() {
                bail!("status must be one of pending, accepted, rejected (got '{status}')");
            }
            let booking_id = BookingId::from(booking_id);
            backend.update_booking_status(&booking_id, &status).await?;
            println!("booking {booking_id} is now {status}");
        }
        Command::SetLocationActive {
            location_id,
            active,
        } => {
            let location_id = LocationId::from(location_id);
            backend.set_location_active(&location_id, active).await?;
            println!("location {location_id} active={active}");
        }
        Command::Demo {
            email,
            location,
            decision,
            decide_after_ms,
        } => {
            let decision = match BookingStatus::parse(&decision) {
                Some(status) if status.is_terminal() => status,
                _ => bail!("decision must be accepted or rejected (got '{decision}')"),
            };
            run_demo(
                backend,
                &settings,
                &email,
                &location,
                decision,
                Duration::from_millis(decide_after_ms),
            )
            .await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` directives when they parse, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

async fn run_demo(
    backend: Arc<LocalBackendGateway>,
    settings: &ClientSettings,
    email: &str,
    location: &str,
    decision: BookingStatus,
    decide_after: Duration,
) -> Result<()> {
    let gateway: Arc<dyn BackendGateway> = backend.clone();

    let auth = AuthSession::new(Arc::clone(&gateway), settings);
    auth.update_email(email);
    auth.request_otp().await;
    let code = auth.snapshot().generated_otp;
    println!("code issued for {email}: {code}");
    auth.verify_otp(&code).await;
    let snapshot = auth.snapshot();
    if snapshot.state != AuthState::Authenticated {
        bail!(
            "login failed: {}",
            snapshot.error_message.unwrap_or_default()
        );
    }
    let customer_id = snapshot.customer_id.context("authenticated without a customer id")?;
    println!("authenticated as {customer_id}");

    let booking = BookingController::new(Arc::clone(&gateway), settings);
    booking.load_locations().await;
    let locations = match booking.locations_state() {
        LocationsState::Success(locations) => locations,
        LocationsState::Error(message) => bail!("locations unavailable: {message}"),
        LocationsState::Loading => bail!("locations still loading"),
    };
    let selected = locations
        .into_iter()
        .find(|l| l.id.as_str() == location)
        .with_context(|| format!("unknown location '{location}'"))?;
    if !selected.is_active {
        bail!("location '{location}' is not accepting bookings");
    }
    booking.select_location(selected);

    let mut states = booking.subscribe();
    booking.submit_booking(&customer_id).await;
    let booking_id = booking
        .current_booking_id()
        .with_context(|| format!("booking failed: {:?}", booking.booking_state()))?;
    println!("booking {booking_id} submitted");

    let operator = Arc::clone(&backend);
    let decided = booking_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(decide_after).await;
        if let Err(err) = operator
            .update_booking_status(&decided, decision.as_str())
            .await
        {
            warn!(booking_id = %decided, "demo: operator decision failed: {err}");
        }
    });

    let mut last = states.borrow_and_update().state.clone();
    println!("state: {last:?}");
    loop {
        states
            .changed()
            .await
            .context("booking controller went away")?;
        let state = states.borrow_and_update().state.clone();
        if state == last {
            continue;
        }
        println!("state: {state:?}");
        if let BookingState::Error(message) = &state {
            bail!("booking {booking_id} failed: {message}");
        }
        if state == BookingState::Idle {
            break;
        }
        last = state;
    }

    info!(booking_id = %booking_id, "demo: booking settled");
    Ok(())
}
