use std::collections::HashMap;

use super::*;
use crate::test_support::ScriptedGateway;
use shared::domain::{LocationId, BOMBAY_ID};
use tokio::time::Instant;

fn controller_with(gateway: ScriptedGateway) -> (Arc<ScriptedGateway>, BookingController) {
    let gateway = Arc::new(gateway);
    let controller = BookingController::new(gateway.clone(), &ClientSettings::default());
    (gateway, controller)
}

fn customer() -> CustomerId {
    CustomerId::from("customer_jane_1")
}

async fn wait_for_state(
    rx: &mut watch::Receiver<BookingSnapshot>,
    expected: BookingState,
) -> BookingSnapshot {
    rx.wait_for(|s| s.state == expected)
        .await
        .expect("controller alive")
        .clone()
}

async fn settle_subscription(controller: &BookingController) {
    while controller.has_active_subscription() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn accepted_booking_resets_after_delay() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    let mut rx = controller.subscribe();

    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, BookingState::Pending);
    assert_eq!(snapshot.current_booking_id, Some(BookingId::from("b1")));
    assert!(controller.has_active_subscription());
    assert_eq!(
        gateway.calls_named("create:").await,
        vec!["create:customer_jane_1:kolkata".to_string()]
    );

    gateway.push_status("b1", "pending").await;
    gateway.push_status("b1", "accepted").await;
    wait_for_state(&mut rx, BookingState::Accepted).await;
    let accepted_at = Instant::now();

    tokio::time::sleep(Duration::from_millis(2_400)).await;
    assert_eq!(controller.booking_state(), BookingState::Accepted);
    assert!(gateway.subscription_closed("b1").await);

    let snapshot = wait_for_state(&mut rx, BookingState::Idle).await;
    let waited = accepted_at.elapsed();
    assert!(waited >= Duration::from_millis(2_500) && waited < Duration::from_millis(2_510));
    assert_eq!(snapshot.current_booking_id, None);
    assert_eq!(snapshot.selected_location, Some(Location::kolkata()));
    settle_subscription(&controller).await;
}

#[tokio::test(start_paused = true)]
async fn rejected_booking_also_resets() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    let mut rx = controller.subscribe();
    controller.select_location(Location::bombay());
    controller.submit_booking(&customer()).await;

    gateway.push_status("b1", "rejected").await;
    wait_for_state(&mut rx, BookingState::Rejected).await;

    let snapshot = wait_for_state(&mut rx, BookingState::Idle).await;
    assert_eq!(snapshot.current_booking_id, None);
    assert_eq!(snapshot.selected_location, Some(Location::bombay()));
}

#[tokio::test(start_paused = true)]
async fn unknown_status_ends_subscription_with_error() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    let mut rx = controller.subscribe();
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;

    gateway.push_status("b1", "confirmed").await;
    let snapshot =
        wait_for_state(&mut rx, BookingState::Error("Unknown status: confirmed".into())).await;
    assert_eq!(snapshot.current_booking_id, Some(BookingId::from("b1")));

    settle_subscription(&controller).await;
    assert!(gateway.subscription_closed("b1").await);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        controller.booking_state(),
        BookingState::Error("Unknown status: confirmed".into())
    );
}

#[tokio::test(start_paused = true)]
async fn stream_error_becomes_error_state() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    let mut rx = controller.subscribe();
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;

    gateway.push_error("b1", "listener cancelled").await;
    wait_for_state(&mut rx, BookingState::Error("listener cancelled".into())).await;
    settle_subscription(&controller).await;
}

#[test]
fn status_mapping_is_total() {
    assert_eq!(map_booking_status("pending"), BookingState::Pending);
    assert_eq!(map_booking_status("accepted"), BookingState::Accepted);
    assert_eq!(map_booking_status("rejected"), BookingState::Rejected);
    assert_eq!(
        map_booking_status("ACCEPTED"),
        BookingState::Error("Unknown status: ACCEPTED".into())
    );
    assert_eq!(
        map_booking_status(""),
        BookingState::Error("Unknown status: ".into())
    );
}

#[tokio::test(start_paused = true)]
async fn submit_without_selection_is_ignored() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    controller.submit_booking(&customer()).await;

    assert_eq!(controller.snapshot(), BookingSnapshot::default());
    assert!(gateway.calls_named("create:").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_failure_reports_message_or_fallback() {
    let (gateway, controller) = controller_with(ScriptedGateway {
        fail_create: Some("location closed".into()),
        ..Default::default()
    });
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;
    assert_eq!(
        controller.booking_state(),
        BookingState::Error("location closed".into())
    );
    assert_eq!(controller.current_booking_id(), None);
    assert!(!controller.has_active_subscription());
    assert!(gateway.calls_named("subscribe:").await.is_empty());

    let (_gateway, controller) = controller_with(ScriptedGateway {
        fail_create: Some(String::new()),
        ..Default::default()
    });
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;
    assert_eq!(
        controller.booking_state(),
        BookingState::Error(CREATE_FAILED_MESSAGE.into())
    );
}

#[tokio::test(start_paused = true)]
async fn subscribe_failure_keeps_booking_id() {
    let (_gateway, controller) = controller_with(ScriptedGateway {
        fail_subscribe: Some("permission denied".into()),
        ..Default::default()
    });
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, BookingState::Error("permission denied".into()));
    assert_eq!(snapshot.current_booking_id, Some(BookingId::from("b1")));
    assert!(!controller.has_active_subscription());

    let (_gateway, controller) = controller_with(ScriptedGateway {
        fail_subscribe: Some(String::new()),
        ..Default::default()
    });
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;
    assert_eq!(
        controller.booking_state(),
        BookingState::Error(SUBSCRIBE_FAILED_MESSAGE.into())
    );
}

#[tokio::test(start_paused = true)]
async fn create_timeout_is_reported() {
    let (_gateway, controller) = controller_with(ScriptedGateway {
        delay: Some(Duration::from_secs(20)),
        ..Default::default()
    });
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;
    assert_eq!(
        controller.booking_state(),
        BookingState::Error("request timed out after 15s".into())
    );
}

#[tokio::test(start_paused = true)]
async fn new_submission_replaces_previous_subscription() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    let mut rx = controller.subscribe();
    controller.select_location(Location::kolkata());

    controller.submit_booking(&customer()).await;
    controller.submit_booking(&customer()).await;
    assert_eq!(controller.current_booking_id(), Some(BookingId::from("b2")));

    while !gateway.subscription_closed("b1").await {
        tokio::task::yield_now().await;
    }
    gateway.push_status("b1", "accepted").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.booking_state(), BookingState::Pending);

    gateway.push_status("b2", "accepted").await;
    wait_for_state(&mut rx, BookingState::Accepted).await;
}

#[tokio::test(start_paused = true)]
async fn resubmitting_during_auto_reset_is_not_clobbered() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    let mut rx = controller.subscribe();
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;

    gateway.push_status("b1", "accepted").await;
    wait_for_state(&mut rx, BookingState::Accepted).await;

    controller.submit_booking(&customer()).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, BookingState::Pending);
    assert_eq!(snapshot.current_booking_id, Some(BookingId::from("b2")));
}

#[tokio::test(start_paused = true)]
async fn reset_tears_down_and_ignores_late_updates() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;

    controller.reset_booking_state();
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, BookingState::Idle);
    assert_eq!(snapshot.current_booking_id, None);
    assert_eq!(snapshot.selected_location, Some(Location::kolkata()));

    settle_subscription(&controller).await;
    gateway.push_status("b1", "accepted").await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.booking_state(), BookingState::Idle);

    controller.clear_selected_location();
    assert_eq!(controller.snapshot().selected_location, None);
}

#[tokio::test(start_paused = true)]
async fn dropping_controller_closes_subscription() {
    let (gateway, controller) = controller_with(ScriptedGateway::default());
    controller.select_location(Location::kolkata());
    controller.submit_booking(&customer()).await;

    drop(controller);
    while !gateway.subscription_closed("b1").await {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn locations_merge_overrides() {
    let (_gateway, controller) = controller_with(ScriptedGateway {
        overrides: Some(HashMap::from([(LocationId::from(BOMBAY_ID), false)])),
        ..Default::default()
    });
    assert_eq!(controller.locations_state(), LocationsState::Loading);

    controller.load_locations().await;
    let LocationsState::Success(locations) = controller.locations_state() else {
        panic!("expected locations");
    };
    assert_eq!(locations.len(), 2);
    assert!(locations[0].is_active);
    assert!(!locations[1].is_active);
}

#[tokio::test(start_paused = true)]
async fn locations_fall_back_when_overrides_fail() {
    let (_gateway, controller) = controller_with(ScriptedGateway {
        overrides: None,
        ..Default::default()
    });
    controller.load_locations().await;
    assert_eq!(
        controller.locations_state(),
        LocationsState::Success(Location::catalog())
    );
}

#[tokio::test(start_paused = true)]
async fn locations_timeout_is_an_error() {
    let (_gateway, controller) = controller_with(ScriptedGateway {
        delay: Some(Duration::from_secs(60)),
        ..Default::default()
    });
    controller.load_locations().await;
    assert_eq!(
        controller.locations_state(),
        LocationsState::Error("request timed out after 15s".into())
    );
}

#[tokio::test]
async fn history_is_newest_first() {
    let record = |id: &str, owner: &str, timestamp: i64| BookingRecord {
        booking_id: BookingId::from(id),
        customer_id: CustomerId::from(owner),
        location: LocationId::from(BOMBAY_ID),
        status: "pending".into(),
        timestamp,
    };
    let (_gateway, controller) = controller_with(ScriptedGateway {
        bookings: vec![
            record("old", "customer_jane_1", 10),
            record("other", "customer_joe_1", 50),
            record("new", "customer_jane_1", 30),
        ],
        ..Default::default()
    });

    let history = controller
        .customer_bookings(&customer())
        .await
        .expect("history");
    let ids: Vec<&str> = history.iter().map(|b| b.booking_id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);

    let booking = controller
        .fetch_booking(&BookingId::from("other"))
        .await
        .expect("booking");
    assert_eq!(booking.timestamp, 50);
    assert!(controller.fetch_booking(&BookingId::from("missing")).await.is_err());
}
