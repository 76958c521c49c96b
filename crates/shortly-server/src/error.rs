use actix_web::{HttpResponse, ResponseError};
use std::fmt;

#[derive(Debug)]
pub enum ServerError {
    /// Database error
    Database(rusqlite::Error),
    /// Product missing or no longer purchasable
    ProductNotFound(i64),
    /// Order missing, or not owned by the caller
    OrderNotFound,
    /// Order has already left `pending`
    OrderAlreadySettled,
    /// Missing or malformed caller identity
    Unauthorized,
    /// Invalid request payload
    InvalidRequest(String),
    /// Internal error
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Database(e) => write!(f, "database error: {}", e),
            ServerError::ProductNotFound(id) => write!(f, "product not found: {}", id),
            ServerError::OrderNotFound => write!(f, "order not found"),
            ServerError::OrderAlreadySettled => write!(f, "order already settled"),
            ServerError::Unauthorized => write!(f, "unauthorized"),
            ServerError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            ServerError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<rusqlite::Error> for ServerError {
    fn from(e: rusqlite::Error) -> Self {
        ServerError::Database(e)
    }
}

impl ResponseError for ServerError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ServerError::ProductNotFound(id) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "product_not_found",
                "message": format!("Product {} not found or no longer available", id)
            })),
            ServerError::OrderNotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": "order_not_found",
                "message": "Order not found"
            })),
            ServerError::OrderAlreadySettled => HttpResponse::Conflict().json(serde_json::json!({
                "error": "order_already_settled",
                "message": "Order has already been settled"
            })),
            ServerError::Unauthorized => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Caller identity required"
            })),
            ServerError::InvalidRequest(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "invalid_request",
                    "message": msg
                }))
            }
            ServerError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
            ServerError::Database(e) => {
                tracing::error!("Database error: {}", e);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
