use super::*;
use crate::test_support::ScriptedGateway;
use shared::domain::{BOMBAY_ID, KOLKATA_ID};

#[tokio::test]
async fn missing_gateway_fails_every_call() {
    let gateway = MissingBackendGateway;
    let customer = CustomerId::from("customer_1");
    let booking = BookingId::from("b1");

    let err = gateway
        .send_verification_code("a@b.com")
        .await
        .expect_err("no backend");
    assert_eq!(err.to_string(), "backend gateway is unavailable");
    assert!(gateway.verify_code("123456").await.is_err());
    assert!(gateway.generate_code("a@b.com").await.is_err());
    assert!(gateway.verify_email_code("a@b.com", "1234").await.is_err());
    assert!(gateway.save_customer(&customer, "a@b.com").await.is_err());
    assert!(gateway
        .create_booking(&customer, &LocationId::from(KOLKATA_ID))
        .await
        .is_err());
    let err = gateway
        .fetch_booking(&booking)
        .await
        .expect_err("no backend");
    assert_eq!(err.to_string(), "backend gateway is unavailable for booking b1");
    assert!(gateway.subscribe_booking_status(&booking).await.is_err());
    assert!(gateway.fetch_customer_bookings(&customer).await.is_err());
}

#[tokio::test]
async fn catalog_falls_back_to_static_locations_when_overrides_fail() {
    let catalog = MissingBackendGateway
        .fetch_location_catalog()
        .await
        .expect("fallback catalog");
    assert_eq!(catalog, Location::catalog());
    assert!(catalog.iter().all(|l| l.is_active));
}

#[tokio::test]
async fn catalog_applies_overrides_and_defaults_missing_to_active() {
    let gateway = ScriptedGateway {
        overrides: Some(HashMap::from([(LocationId::from(BOMBAY_ID), false)])),
        ..Default::default()
    };

    let catalog = gateway.fetch_location_catalog().await.expect("catalog");
    let flags: Vec<(&str, bool)> = catalog
        .iter()
        .map(|l| (l.id.as_str(), l.is_active))
        .collect();
    assert_eq!(flags, vec![(KOLKATA_ID, true), (BOMBAY_ID, false)]);
}
