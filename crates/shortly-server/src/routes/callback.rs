use actix_web::{web, HttpResponse};
use std::collections::HashMap;

use crate::service;
use crate::state::AppState;

/// POST /api/orders/payment/callback - asynchronous notification from the
/// gateway.
///
/// The wire contract wants a literal ack body (`1|OK` / `0|<reason>`), not
/// an HTTP status: the response is always 200 and the body decides whether
/// the gateway redelivers.
pub async fn payment_callback(
    form: web::Form<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let fields: Vec<(String, String)> = form.into_inner().into_iter().collect();
    let ack = service::handle_callback(&state.db, &state.merchant, &fields);

    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(ack.into_body())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/orders/payment/callback",
        web::post().to(payment_callback),
    );
}
