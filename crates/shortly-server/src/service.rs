//! Order orchestration: user-initiated creation and gateway-initiated
//! settlement.

use serde::Serialize;
use uuid::Uuid;

use ecpay::constants::{ack_error, ACK_OK};
use ecpay::{CheckoutRequest, CheckoutUrls, EcpayError, MerchantConfig, PaymentNotification};

use crate::config::ServerConfig;
use crate::db::{Database, Order, OrderStatus, Product};
use crate::error::ServerError;
use crate::fulfillment;
use crate::metrics;
use crate::settlement::{self, SettlementOutcome};

/// Trade description shown on the gateway's checkout page.
const TRADE_DESC: &str = "Short URL service payment";

/// Response for a created order: the stored row plus the signed checkout the
/// caller redirects the buyer with.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order: Order,
    pub product: Product,
    pub checkout: CheckoutRequest,
    /// Relative path serving the auto-submit payment page for this order.
    pub payment_url: String,
}

/// Acknowledgment for the gateway wire contract. The body is a literal
/// token, not a status code; [`GatewayAck::Ok`] stops redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayAck {
    Ok,
    Failure(String),
}

impl GatewayAck {
    pub fn into_body(self) -> String {
        match self {
            GatewayAck::Ok => ACK_OK.to_string(),
            GatewayAck::Failure(reason) => ack_error(&reason),
        }
    }
}

/// Create a pending order for an active product and build its checkout.
///
/// The product price is snapshotted onto the order; later catalog edits do
/// not change what the buyer owes. Order numbers are random 32-hex UUIDs,
/// unique regardless of clock resolution or request rate.
pub fn create_order(
    db: &Database,
    config: &ServerConfig,
    merchant: &MerchantConfig,
    user_id: i64,
    product_id: i64,
) -> Result<OrderView, ServerError> {
    let product = db
        .get_active_product(product_id)?
        .ok_or(ServerError::ProductNotFound(product_id))?;

    let order_number = Uuid::new_v4().simple().to_string();
    let order = db.insert_order(user_id, product_id, &order_number, product.price)?;

    tracing::info!(
        order = %order.order_number,
        user = user_id,
        product = product_id,
        price = order.price,
        "order created"
    );
    metrics::ORDERS_CREATED.inc();

    let checkout = checkout_for(config, merchant, &order, &product);
    Ok(OrderView {
        payment_url: format!("/api/orders/{}/payment", order.id),
        order,
        product,
        checkout,
    })
}

/// Build the signed checkout request for an order.
pub fn checkout_for(
    config: &ServerConfig,
    merchant: &MerchantConfig,
    order: &Order,
    product: &Product,
) -> CheckoutRequest {
    let urls = CheckoutUrls {
        return_url: format!("{}/api/orders/payment/callback", config.backend_url),
        client_back_url: Some(format!("{}/orders/{}", config.frontend_url, order.id)),
        order_result_url: Some(format!("{}/orders/{}/result", config.frontend_url, order.id)),
    };
    ecpay::build_checkout(
        merchant,
        &order.order_number,
        order.price,
        &product.name,
        TRADE_DESC,
        &urls,
    )
}

/// Process an asynchronous payment notification.
///
/// Verification, then settlement, then fulfillment, collapsed into the ack
/// the gateway expects. Every processed notification gets `Ok` (business
/// failures and replays included) so the gateway stops redelivering;
/// `Failure` is reserved for forged payloads, unknown orders and
/// unrecoverable errors.
pub fn handle_callback(
    db: &Database,
    merchant: &MerchantConfig,
    fields: &[(String, String)],
) -> GatewayAck {
    let notification = match ecpay::verify_notification(merchant, fields) {
        Ok(notification) => notification,
        Err(EcpayError::MacMismatch) => {
            // Security event: the payload was altered or signed with the
            // wrong secret. Nothing in it can be trusted.
            tracing::warn!("callback rejected: CheckMacValue mismatch");
            metrics::CALLBACKS_TOTAL
                .with_label_values(&["mac_mismatch"])
                .inc();
            return GatewayAck::Failure("CheckMacValue verification failed".to_string());
        }
        Err(e) => {
            tracing::warn!(error = %e, "callback rejected: malformed payload");
            metrics::CALLBACKS_TOTAL
                .with_label_values(&["invalid"])
                .inc();
            return GatewayAck::Failure(format!("invalid callback: {e}"));
        }
    };

    match settlement::apply_settlement(db, &notification) {
        Ok(SettlementOutcome::Applied { order }) => {
            if order.order_status == OrderStatus::Paid {
                metrics::CALLBACKS_TOTAL.with_label_values(&["paid"]).inc();
                fulfillment::attempt_now(db, order.id);
            } else {
                metrics::CALLBACKS_TOTAL
                    .with_label_values(&["payment_failed"])
                    .inc();
            }
            GatewayAck::Ok
        }
        Ok(SettlementOutcome::AlreadySettled { .. }) => {
            metrics::CALLBACKS_TOTAL.with_label_values(&["replay"]).inc();
            GatewayAck::Ok
        }
        Ok(SettlementOutcome::NotFound) => {
            metrics::CALLBACKS_TOTAL
                .with_label_values(&["not_found"])
                .inc();
            GatewayAck::Failure("order not found".to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "callback processing failed");
            GatewayAck::Failure("internal error".to_string())
        }
    }
}

/// Dev-mode hook: settle one of the caller's pending orders as if the
/// gateway had delivered a successful simulated notification.
pub fn simulate_payment(
    db: &Database,
    user_id: i64,
    order_id: i64,
) -> Result<Order, ServerError> {
    let order = db
        .get_order_for_user(order_id, user_id)?
        .ok_or(ServerError::OrderNotFound)?;

    let notification = PaymentNotification {
        merchant_trade_no: order.order_number.clone(),
        trade_no: format!("SIM{}", chrono::Utc::now().timestamp()),
        payment_date: Some(chrono::Utc::now().naive_utc()),
        payment_type: "Credit_CreditCard".to_string(),
        trade_amount: order.price,
        simulate_paid: true,
        rtn_code: "1".to_string(),
        rtn_msg: "simulated payment".to_string(),
        check_mac_value: "SIMULATED".to_string(),
    };

    match settlement::apply_settlement(db, &notification)? {
        SettlementOutcome::Applied { order } => {
            fulfillment::attempt_now(db, order.id);
            db.get_order(order.id)?
                .ok_or_else(|| ServerError::Internal("settled order disappeared".to_string()))
        }
        SettlementOutcome::AlreadySettled { .. } => Err(ServerError::OrderAlreadySettled),
        SettlementOutcome::NotFound => {
            Err(ServerError::Internal("order vanished during simulation".to_string()))
        }
    }
}
