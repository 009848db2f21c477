mod common;

use campus_escrow::application::orders::PaymentApplication;
use campus_escrow::domain::ids::{ListingId, OrderId};
use campus_escrow::domain::order::OrderStatus;
use campus_escrow::domain::payout::{PayoutStatus, PayoutType};
use campus_escrow::domain::ports::RawNotification;
use campus_escrow::error::EscrowError;
use campus_escrow::infrastructure::gateway::callback_authorization;
use common::*;
use std::time::Duration;

#[tokio::test]
async fn test_order_total_carries_both_fees() {
    let h = harness().await;
    let receipt = h
        .engine
        .orders
        .create_order(&ListingId::new("desk"), BUYER, "Library steps")
        .await
        .unwrap();
    assert_eq!(receipt.total.paise, 55_825);
    assert_eq!(receipt.total.display, "₹558.25");

    let view = h.engine.orders.get_order(receipt.order_id, BUYER).await.unwrap();
    assert_eq!(view.status, OrderStatus::Pending);
    assert_eq!(view.item_price.paise, 50_000);
    assert_eq!(view.platform_fee.paise, 5_000);
    assert_eq!(view.gateway_fee.paise, 825);
    assert_eq!(view.meeting.location, "Library steps");
}

#[tokio::test]
async fn test_create_order_rejections() {
    let h = harness().await;

    let own = h
        .engine
        .orders
        .create_order(&ListingId::new("desk"), SELLER, "Quad")
        .await;
    assert!(matches!(own, Err(EscrowError::InvalidOperation(_))));

    let sold = h
        .engine
        .orders
        .create_order(&ListingId::new("bike"), OTHER_BUYER, "Quad")
        .await;
    assert!(matches!(sold, Err(EscrowError::InvalidState { .. })));

    let missing = h
        .engine
        .orders
        .create_order(&ListingId::new("piano"), BUYER, "Quad")
        .await;
    assert!(matches!(missing, Err(EscrowError::NotFound { .. })));
}

#[tokio::test]
async fn test_duplicate_payment_callback_is_a_noop() {
    let h = harness().await;
    let order_id = h.place("desk", BUYER).await;

    // 1. First success escrows the order
    let callback = h.gateway.signed_callback(order_id, "TXN-A", true).unwrap();
    let first = h.engine.orders.apply_payment_result(&callback).await.unwrap();
    assert_eq!(first, PaymentApplication::Escrowed);

    // 2. Replaying it, or a late second success, changes nothing
    let again = h.engine.orders.apply_payment_result(&callback).await.unwrap();
    assert_eq!(again, PaymentApplication::Duplicate);
    let other = h.gateway.signed_callback(order_id, "TXN-B", true).unwrap();
    let late = h.engine.orders.apply_payment_result(&other).await.unwrap();
    assert_eq!(late, PaymentApplication::Duplicate);

    let view = h.engine.orders.get_order(order_id, BUYER).await.unwrap();
    assert_eq!(view.status, OrderStatus::Escrowed);
    assert_eq!(view.payment_reference.as_deref(), Some("TXN-A"));
    assert_eq!(view.total.paise, 55_825);
}

#[tokio::test]
async fn test_declined_payment_keeps_order_pending() {
    let h = harness().await;
    let order_id = h.place("chair", BUYER).await;

    let declined = h.gateway.signed_callback(order_id, "TXN-D", false).unwrap();
    let result = h.engine.orders.apply_payment_result(&declined).await.unwrap();
    assert_eq!(
        result,
        PaymentApplication::Declined {
            code: "PAYMENT_ERROR".to_string()
        }
    );

    let view = h.engine.orders.get_order(order_id, BUYER).await.unwrap();
    assert_eq!(view.status, OrderStatus::Pending);
    assert_eq!(view.payment_reference.as_deref(), Some("TXN-D"));

    // The buyer can still pay afterwards
    assert_eq!(h.pay(order_id).await, PaymentApplication::Escrowed);
}

#[tokio::test]
async fn test_unauthenticated_callback_is_rejected() {
    let h = harness().await;
    let order_id = h.place("desk", BUYER).await;
    let genuine = h.gateway.signed_callback(order_id, "TXN-F", true).unwrap();

    let forged = RawNotification {
        authorization: callback_authorization("merchant", "guess"),
        body: genuine.body.clone(),
    };
    let result = h.engine.orders.apply_payment_result(&forged).await;
    assert!(matches!(result, Err(EscrowError::Authentication(_))));

    // A "test" signature gets no special treatment
    let bypass = RawNotification {
        authorization: "test-signature".to_string(),
        body: genuine.body.clone(),
    };
    assert!(matches!(
        h.engine.orders.apply_payment_result(&bypass).await,
        Err(EscrowError::Authentication(_))
    ));

    assert_eq!(
        h.engine.orders.order_status(order_id).await.unwrap(),
        OrderStatus::Pending
    );

    // Header case does not matter for the digest
    let upper = RawNotification {
        authorization: genuine.authorization.to_uppercase(),
        body: genuine.body,
    };
    assert_eq!(
        h.engine.orders.apply_payment_result(&upper).await.unwrap(),
        PaymentApplication::Escrowed
    );
}

#[tokio::test]
async fn test_callback_for_unknown_order() {
    let h = harness().await;
    let callback = h
        .gateway
        .signed_callback(OrderId::new(), "TXN-X", true)
        .unwrap();
    assert!(matches!(
        h.engine.orders.apply_payment_result(&callback).await,
        Err(EscrowError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_complete_requires_escrow() {
    let h = harness().await;
    let order_id = h.place("desk", BUYER).await;

    let result = h.engine.orders.complete_order(order_id, BUYER, None).await;
    match result {
        Err(EscrowError::InvalidState { current, .. }) => assert_eq!(current, "pending"),
        other => panic!("expected InvalidState, got {other:?}"),
    }
    assert_eq!(
        h.engine.orders.order_status(order_id).await.unwrap(),
        OrderStatus::Pending
    );
    assert!(h.payouts_of(SELLER).await.is_empty());
}

#[tokio::test]
async fn test_only_the_buyer_completes() {
    let h = harness().await;

    // Forbidden is reported before any state check
    let pending = h.place("lamp", BUYER).await;
    assert!(matches!(
        h.engine.orders.complete_order(pending, OTHER_BUYER, None).await,
        Err(EscrowError::Forbidden(_))
    ));

    let order_id = h.escrowed("desk", BUYER).await;
    for caller in [SELLER, OTHER_BUYER, SCOUT] {
        assert!(matches!(
            h.engine.orders.complete_order(order_id, caller, None).await,
            Err(EscrowError::Forbidden(_))
        ));
    }
    assert_eq!(
        h.engine.orders.order_status(order_id).await.unwrap(),
        OrderStatus::Escrowed
    );
}

#[tokio::test]
async fn test_completion_schedules_seller_payout() {
    let h = harness().await;
    let order_id = h.escrowed("desk", BUYER).await;
    let meeting = h.clock_now();

    let receipt = h
        .engine
        .orders
        .complete_order(order_id, BUYER, Some(meeting))
        .await
        .unwrap();
    assert_eq!(receipt.seller_payout.paise, DESK_PRICE);

    let view = h.engine.orders.get_order(order_id, SELLER).await.unwrap();
    assert_eq!(view.status, OrderStatus::Completed);
    assert_eq!(view.meeting.scheduled_at, Some(meeting));
    assert!(view.completed_at.is_some());

    let payout = h.payout_for_order(order_id, PayoutType::SellerPayout).await;
    assert_eq!(payout.user_id, SELLER);
    assert_eq!(payout.status, PayoutStatus::Payable);
    assert_eq!(payout.amount.0, DESK_PRICE);
}

#[tokio::test]
async fn test_order_visibility() {
    let h = harness().await;
    let order_id = h.place("desk", BUYER).await;
    h.place("chair", OTHER_BUYER).await;

    assert!(h.engine.orders.get_order(order_id, SELLER).await.is_ok());
    assert!(matches!(
        h.engine.orders.get_order(order_id, OTHER_BUYER).await,
        Err(EscrowError::Forbidden(_))
    ));

    assert_eq!(h.engine.orders.list_orders_for_user(BUYER).await.unwrap().len(), 1);
    assert_eq!(h.engine.orders.list_orders_for_user(SELLER).await.unwrap().len(), 2);
    assert!(h.engine.orders.list_orders_for_user(SCOUT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_initiate_payment_timeout_leaves_order_pending() {
    let h = harness().await;
    let order_id = h.place("desk", BUYER).await;

    // 1. A gateway slower than the timeout
    h.gateway
        .set_initiate_delay(Some(Duration::from_secs(5)))
        .await;
    let result = h.engine.orders.initiate_payment(order_id).await;
    assert!(matches!(result, Err(EscrowError::Gateway(_))));
    assert_eq!(
        h.engine.orders.order_status(order_id).await.unwrap(),
        OrderStatus::Pending
    );

    // 2. Retrying once the gateway recovers
    h.gateway.set_initiate_delay(None).await;
    let redirect = h.engine.orders.initiate_payment(order_id).await.unwrap();
    assert!(redirect.payment_url.contains(&order_id.to_string()));
    assert!(redirect.payment_url.contains("amount=55825"));

    // 3. Escrowed orders cannot be paid again
    h.pay(order_id).await;
    assert!(matches!(
        h.engine.orders.initiate_payment(order_id).await,
        Err(EscrowError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_payment_callback_racing_completion() {
    let h = harness().await;
    let order_id = h.place("desk", BUYER).await;
    let callback = h.gateway.signed_callback(order_id, &h.txn(), true).unwrap();

    let (payment, completion) = tokio::join!(
        h.engine.orders.apply_payment_result(&callback),
        h.engine.orders.complete_order(order_id, BUYER, None),
    );
    assert_eq!(payment.unwrap(), PaymentApplication::Escrowed);

    let status = h.engine.orders.order_status(order_id).await.unwrap();
    match completion {
        Ok(_) => {
            assert_eq!(status, OrderStatus::Completed);
            assert_eq!(h.payouts_of(SELLER).await.len(), 1);
        }
        Err(EscrowError::InvalidState { .. }) => {
            assert_eq!(status, OrderStatus::Escrowed);
            assert!(h.payouts_of(SELLER).await.is_empty());
        }
        Err(other) => panic!("unexpected completion error: {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_callback_racing_completion() {
    let h = harness().await;
    let order_id = h.escrowed("desk", BUYER).await;
    let replay = h.gateway.signed_callback(order_id, &h.txn(), true).unwrap();

    let (payment, completion) = tokio::join!(
        h.engine.orders.apply_payment_result(&replay),
        h.engine.orders.complete_order(order_id, BUYER, None),
    );
    assert_eq!(payment.unwrap(), PaymentApplication::Duplicate);
    assert!(completion.is_ok());
    assert_eq!(
        h.engine.orders.order_status(order_id).await.unwrap(),
        OrderStatus::Completed
    );
    assert_eq!(h.payouts_of(SELLER).await.len(), 1);
}
