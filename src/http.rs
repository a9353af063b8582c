//! HTTP transport: maps JSON requests onto the storefront service.
//!
//! ## Routes
//!
//! - `POST /orders`, `GET /orders`, `GET /orders/{id}`, `PUT /orders/{id}` (admin)
//! - `POST /orders/{id}/cancel`, `GET /orders/{id}/stock-warnings` (admin)
//! - `POST /promocodes/validate`, `GET|POST /promocodes`, `PUT /promocodes/{code}` (admin)
//! - `GET|POST|DELETE /cart`, `POST /cart/merge`
//! - `GET /products/{id}`, `PUT /products/{id}` (admin)
//! - `GET /health`
//!
//! Callers authenticate with `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{Authenticator, Identity};
use crate::cart::{Cart, CartLine, VariantKey};
use crate::catalog::Product;
use crate::error::CommerceError;
use crate::lifecycle::{OrderStatus, PaymentStatus, Transition};
use crate::order::{CheckoutRequest, Order};
use crate::promo::{PromoCode, PromoQuote};
use crate::service::{StockWarning, Storefront, TransitionOutcome};
use crate::types::Amount;

pub struct AppState {
    pub storefront: Storefront,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(storefront: Storefront, auth: Arc<dyn Authenticator>) -> Self {
        Self { storefront, auth }
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, CommerceError> {
        let unauthorized = |msg: &str| CommerceError::Unauthorized(msg.to_string());
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| unauthorized("malformed authorization header"))?;
        self.auth
            .resolve(token)
            .ok_or_else(|| unauthorized("invalid bearer token"))
    }
}

type SharedState = State<Arc<AppState>>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/{id}", get(get_order).put(update_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/orders/{id}/stock-warnings", get(stock_warnings))
        .route("/promocodes", get(list_promos).post(create_promo))
        .route("/promocodes/validate", post(validate_promo))
        .route("/promocodes/{code}", put(update_promo))
        .route("/cart", get(get_cart).post(write_cart).delete(delete_cart))
        .route("/cart/merge", post(merge_cart))
        .route("/products/{id}", get(get_product).put(put_product))
        .with_state(state)
}

#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Bad request: {}", msg);
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CommerceError> for ApiError {
    fn from(err: CommerceError) -> Self {
        let message = err.to_string();
        match err {
            CommerceError::Validation(_) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            CommerceError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            CommerceError::Unauthorized(_) => {
                tracing::warn!("Unauthorized: {}", message);
                Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
            }
            CommerceError::Forbidden(_) => Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
            CommerceError::InvalidTransition { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_TRANSITION", message)
            }
            CommerceError::Conflict(_) => Self::new(StatusCode::CONFLICT, "CONFLICT", message),
            CommerceError::Promo(reason) => {
                Self::new(StatusCode::BAD_REQUEST, reason.code(), message)
            }
            CommerceError::Storage(_) | CommerceError::Codec(_) | CommerceError::Internal(_) => {
                tracing::error!("Internal error: {}", message);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal server error",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn create_order(
    State(state): SharedState,
    headers: HeaderMap,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let buyer = state.authenticate(&headers)?;
    let checkout = body(payload)?;
    let order = state.storefront.place_order(&buyer, checkout)?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): SharedState,
    headers: HeaderMap,
) -> Result<Json<Vec<Order>>, ApiError> {
    let caller = state.authenticate(&headers)?;
    Ok(Json(state.storefront.list_orders(&caller)?))
}

async fn get_order(
    State(state): SharedState,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Order>, ApiError> {
    let caller = state.authenticate(&headers)?;
    Ok(Json(state.storefront.get_order(&caller, &id)?))
}

/// Body of `PUT /orders/{id}`: exactly one of `paymentStatus` or `orderStatus`.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub payment_status: Option<PaymentStatus>,
    pub order_status: Option<OrderStatus>,
    pub tracking_number: Option<String>,
    pub note: Option<String>,
    pub version: Option<u64>,
}

impl OrderUpdate {
    pub fn transition(&self) -> Result<Transition, CommerceError> {
        match (self.payment_status, self.order_status) {
            (Some(PaymentStatus::Verified), None) => Ok(Transition::VerifyPayment),
            (Some(PaymentStatus::Rejected), None) => Ok(Transition::RejectPayment),
            (Some(PaymentStatus::Pending), None) => Err(CommerceError::validation(
                "paymentStatus must be verified or rejected",
            )),
            (None, Some(OrderStatus::Cancelled)) => Ok(Transition::Cancel),
            (None, Some(target)) => Ok(Transition::Advance {
                target,
                tracking_number: self.tracking_number.clone(),
            }),
            (Some(_), Some(_)) => Err(CommerceError::validation(
                "send either paymentStatus or orderStatus, not both",
            )),
            (None, None) => Err(CommerceError::validation(
                "paymentStatus or orderStatus is required",
            )),
        }
    }
}

async fn update_order(
    State(state): SharedState,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<OrderUpdate>, JsonRejection>,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let admin = state.authenticate(&headers)?;
    let update = body(payload)?;
    let transition = update.transition()?;
    let outcome =
        state
            .storefront
            .update_order(&admin, &id, transition, update.note, update.version)?;
    Ok(Json(outcome))
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    note: Option<String>,
    version: Option<u64>,
}

async fn cancel_order(
    State(state): SharedState,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<Order>, ApiError> {
    let caller = state.authenticate(&headers)?;
    // no JSON body at all means no note; a JSON body must parse
    let request = match payload {
        Err(JsonRejection::MissingJsonContentType(_)) => CancelRequest::default(),
        other => body(other)?,
    };
    let order = state
        .storefront
        .cancel_order(&caller, &id, request.note, request.version)?;
    Ok(Json(order))
}

async fn stock_warnings(
    State(state): SharedState,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<StockWarning>>, ApiError> {
    let admin = state.authenticate(&headers)?;
    Ok(Json(state.storefront.stock_warnings(&admin, &id)?))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromoValidation {
    code: String,
    cart_total: Amount,
    #[serde(default)]
    categories: Vec<String>,
}

async fn validate_promo(
    State(state): SharedState,
    payload: Result<Json<PromoValidation>, JsonRejection>,
) -> Result<Json<PromoQuote>, ApiError> {
    let request = body(payload)?;
    let quote = state
        .storefront
        .validate_promo(&request.code, request.cart_total, &request.categories)?;
    Ok(Json(quote))
}

async fn list_promos(
    State(state): SharedState,
    headers: HeaderMap,
) -> Result<Json<Vec<PromoCode>>, ApiError> {
    let admin = state.authenticate(&headers)?;
    Ok(Json(state.storefront.list_promos(&admin)?))
}

async fn create_promo(
    State(state): SharedState,
    headers: HeaderMap,
    payload: Result<Json<PromoCode>, JsonRejection>,
) -> Result<(StatusCode, Json<PromoCode>), ApiError> {
    let admin = state.authenticate(&headers)?;
    let promo = state.storefront.create_promo(&admin, body(payload)?)?;
    Ok((StatusCode::CREATED, Json(promo)))
}

async fn update_promo(
    State(state): SharedState,
    Path(code): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<PromoCode>, JsonRejection>,
) -> Result<Json<PromoCode>, ApiError> {
    let admin = state.authenticate(&headers)?;
    let promo = state.storefront.update_promo(&admin, &code, body(payload)?)?;
    Ok(Json(promo))
}

async fn get_cart(State(state): SharedState, headers: HeaderMap) -> Result<Json<Cart>, ApiError> {
    let user = state.authenticate(&headers)?;
    Ok(Json(state.storefront.get_cart(&user)?))
}

/// `POST /cart` accepts a full `{items: [...]}` sync or a single line.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum CartWrite {
    Sync { items: Vec<CartLine> },
    Single(CartLine),
}

async fn write_cart(
    State(state): SharedState,
    headers: HeaderMap,
    payload: Result<Json<CartWrite>, JsonRejection>,
) -> Result<Json<Cart>, ApiError> {
    let user = state.authenticate(&headers)?;
    let cart = match body(payload)? {
        CartWrite::Sync { items } => state.storefront.sync_cart(&user, items)?,
        CartWrite::Single(line) => state.storefront.add_to_cart(&user, line)?,
    };
    Ok(Json(cart))
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct CartRemoval {
    product_id: Option<String>,
    color: Option<String>,
    size: Option<String>,
}

async fn delete_cart(
    State(state): SharedState,
    headers: HeaderMap,
    Query(removal): Query<CartRemoval>,
) -> Result<Json<Cart>, ApiError> {
    let user = state.authenticate(&headers)?;
    let cart = match removal.product_id {
        Some(product_id) => {
            let key = VariantKey {
                product_id,
                color: removal.color,
                size: removal.size,
            };
            state.storefront.remove_from_cart(&user, &key)?
        }
        None => state.storefront.clear_cart(&user)?,
    };
    Ok(Json(cart))
}

#[derive(Deserialize, Debug)]
struct LocalCart {
    #[serde(default)]
    items: Vec<CartLine>,
}

async fn merge_cart(
    State(state): SharedState,
    headers: HeaderMap,
    payload: Result<Json<LocalCart>, JsonRejection>,
) -> Result<Json<Cart>, ApiError> {
    let user = state.authenticate(&headers)?;
    let local = body(payload)?;
    Ok(Json(state.storefront.merge_cart(&user, local.items)?))
}

async fn get_product(
    State(state): SharedState,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.storefront.get_product(&id)?))
}

async fn put_product(
    State(state): SharedState,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<Product>, JsonRejection>,
) -> Result<Json<Product>, ApiError> {
    let admin = state.authenticate(&headers)?;
    let mut product = body(payload)?;
    product.id = id;
    Ok(Json(state.storefront.upsert_product(&admin, product)?))
}
