//! Order settlement: the pending → paid | failed state machine.

use ecpay::PaymentNotification;

use crate::db::{Database, Order, OrderStatus, SettleWrite, SettlementUpdate};
use crate::error::ServerError;

/// Outcome of applying a verified notification to an order.
#[derive(Debug)]
pub enum SettlementOutcome {
    /// Fresh pending→terminal transition; fulfillment is owed exactly when
    /// the new status is `paid`.
    Applied { order: Order },
    /// Duplicate or replayed delivery; the order was already settled and
    /// nothing was written.
    AlreadySettled { order: Order },
    /// No order matches the merchant trade number.
    NotFound,
}

/// Apply a verified payment notification to the order it references.
///
/// The still-pending check and the write are a single conditional UPDATE
/// inside [`Database::settle_order`], so two concurrent deliveries of the
/// same callback cannot both observe `pending` — exactly one wins and the
/// rest see [`SettlementOutcome::AlreadySettled`].
pub fn apply_settlement(
    db: &Database,
    notification: &PaymentNotification,
) -> Result<SettlementOutcome, ServerError> {
    let paid = notification.is_paid();
    let update = SettlementUpdate {
        status: if paid {
            OrderStatus::Paid
        } else {
            OrderStatus::Failed
        },
        trade_no: paid.then(|| notification.trade_no.clone()),
        payment_date: notification
            .payment_date
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string()),
        simulate_paid: notification.simulate_paid,
        check_mac_value: notification.check_mac_value.clone(),
        failure_reason: if paid {
            None
        } else {
            Some(notification.rtn_msg.clone())
        },
    };

    match db.settle_order(&notification.merchant_trade_no, &update)? {
        SettleWrite::Applied(order) => {
            tracing::info!(
                order = %order.order_number,
                status = order.order_status.as_str(),
                trade_no = %notification.trade_no,
                "order settled"
            );
            if paid && notification.trade_amount != order.price {
                tracing::warn!(
                    order = %order.order_number,
                    expected = order.price,
                    received = notification.trade_amount,
                    "settled amount differs from order price"
                );
            }
            Ok(SettlementOutcome::Applied { order })
        }
        SettleWrite::AlreadySettled(order) => {
            tracing::info!(
                order = %order.order_number,
                status = order.order_status.as_str(),
                "duplicate callback for settled order, ignoring"
            );
            Ok(SettlementOutcome::AlreadySettled { order })
        }
        SettleWrite::NotFound => {
            tracing::warn!(
                order = %notification.merchant_trade_no,
                "callback references unknown order"
            );
            Ok(SettlementOutcome::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(order_number: &str, rtn_code: &str) -> PaymentNotification {
        PaymentNotification {
            merchant_trade_no: order_number.to_string(),
            trade_no: "2503011200000001".to_string(),
            payment_date: None,
            payment_type: "Credit_CreditCard".to_string(),
            trade_amount: 9900,
            simulate_paid: false,
            rtn_code: rtn_code.to_string(),
            rtn_msg: if rtn_code == "1" {
                "Succeeded".to_string()
            } else {
                "card declined".to_string()
            },
            check_mac_value: "ABCDEF".to_string(),
        }
    }

    #[test]
    fn test_paid_notification_applies() {
        let db = Database::new(":memory:").unwrap();
        db.insert_order(7, 1, "ord-1", 9900).unwrap();

        let outcome = apply_settlement(&db, &notification("ord-1", "1")).unwrap();
        let order = match outcome {
            SettlementOutcome::Applied { order } => order,
            other => panic!("expected Applied, got {other:?}"),
        };
        assert_eq!(order.order_status, OrderStatus::Paid);
        assert_eq!(order.ecpay_check_mac_value.as_deref(), Some("ABCDEF"));
    }

    #[test]
    fn test_failure_notification_records_reason() {
        let db = Database::new(":memory:").unwrap();
        db.insert_order(7, 1, "ord-1", 9900).unwrap();

        let outcome = apply_settlement(&db, &notification("ord-1", "10200095")).unwrap();
        let order = match outcome {
            SettlementOutcome::Applied { order } => order,
            other => panic!("expected Applied, got {other:?}"),
        };
        assert_eq!(order.order_status, OrderStatus::Failed);
        assert_eq!(order.failure_reason.as_deref(), Some("card declined"));
    }

    #[test]
    fn test_replay_and_unknown() {
        let db = Database::new(":memory:").unwrap();
        db.insert_order(7, 1, "ord-1", 9900).unwrap();

        apply_settlement(&db, &notification("ord-1", "1")).unwrap();
        assert!(matches!(
            apply_settlement(&db, &notification("ord-1", "1")).unwrap(),
            SettlementOutcome::AlreadySettled { .. }
        ));
        assert!(matches!(
            apply_settlement(&db, &notification("ord-9", "1")).unwrap(),
            SettlementOutcome::NotFound
        ));
    }
}
