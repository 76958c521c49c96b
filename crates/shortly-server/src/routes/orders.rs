use actix_web::{web, HttpRequest, HttpResponse};

use crate::db::OrderStatus;
use crate::error::ServerError;
use crate::service;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub product_id: i64,
}

/// Caller identity, injected by the upstream auth layer.
fn user_id_from(req: &HttpRequest) -> Result<i64, ServerError> {
    req.headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or(ServerError::Unauthorized)
}

/// POST /api/orders - create a pending order and its signed checkout
pub async fn create_order(
    req: HttpRequest,
    body: web::Json<CreateOrder>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let user_id = user_id_from(&req)?;
    let view = service::create_order(
        &state.db,
        &state.config,
        &state.merchant,
        user_id,
        body.product_id,
    )?;
    Ok(HttpResponse::Created().json(view))
}

/// GET /api/orders - the caller's orders, newest first
pub async fn list_orders(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let user_id = user_id_from(&req)?;
    let orders = state.db.list_orders_for_user(user_id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "orders": orders })))
}

/// GET /api/orders/{order_id}
pub async fn get_order(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let user_id = user_id_from(&req)?;
    let order = state
        .db
        .get_order_for_user(path.into_inner(), user_id)?
        .ok_or(ServerError::OrderNotFound)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "order": order })))
}

/// GET /api/orders/{order_id}/payment - browser auto-submit checkout form.
///
/// Only pending orders have a payment page; settled orders get a conflict.
pub async fn payment_page(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let user_id = user_id_from(&req)?;
    let order = state
        .db
        .get_order_for_user(path.into_inner(), user_id)?
        .ok_or(ServerError::OrderNotFound)?;
    if order.order_status != OrderStatus::Pending {
        return Err(ServerError::OrderAlreadySettled);
    }
    let product = state
        .db
        .get_product(order.product_id)?
        .ok_or_else(|| ServerError::Internal(format!("product {} missing", order.product_id)))?;

    let checkout = service::checkout_for(&state.config, &state.merchant, &order, &product);
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(ecpay::render_form_html(&checkout)))
}

/// POST /api/orders/{order_id}/simulate-payment - dev-mode only; registered
/// by `configure_dev`.
pub async fn simulate_payment(
    req: HttpRequest,
    path: web::Path<i64>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let user_id = user_id_from(&req)?;
    let order = service::simulate_payment(&state.db, user_id, path.into_inner())?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "order": order,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/orders", web::post().to(create_order))
        .route("/api/orders", web::get().to(list_orders))
        .route("/api/orders/{order_id}", web::get().to(get_order))
        .route(
            "/api/orders/{order_id}/payment",
            web::get().to(payment_page),
        );
}

pub fn configure_dev(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/orders/{order_id}/simulate-payment",
        web::post().to(simulate_payment),
    );
}
