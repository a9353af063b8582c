//! HTTP transport integration tests.
//!
//! Starts an axum server over a temp sled database and exercises it with reqwest.

use std::sync::Arc;

use serde_json::{Value, json};
use storefront::{
    Storefront,
    auth::{Identity, TokenTable},
    http::{self, AppState},
    order::Charges,
};
use tempfile::TempDir;

const BUYER: &str = "Bearer buyer-token";
const OTHER: &str = "Bearer other-token";
const ADMIN: &str = "Bearer admin-token";

/// Bind to port 0 and return the actual address. The temp dir must outlive the server.
async fn start_server() -> (TempDir, String) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = sled::open(temp_dir.path().join("http.db")).unwrap();
    let storefront = Storefront::new(Arc::new(db), Charges::default()).unwrap();
    let tokens = TokenTable::new()
        .with("buyer-token", Identity::customer("buyer_1"))
        .with("other-token", Identity::customer("buyer_2"))
        .with("admin-token", Identity::admin("ops"));
    let app = http::router(Arc::new(AppState::new(storefront, Arc::new(tokens))));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (temp_dir, format!("http://{addr}"))
}

async fn seed_product(client: &reqwest::Client, base: &str) {
    let resp = client
        .put(format!("{base}/products/productA"))
        .header("Authorization", ADMIN)
        .json(&json!({
            "id": "productA",
            "name": "Dhaka topi",
            "price": 500,
            "stock": 10,
            "category": "apparel"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

fn checkout_body() -> Value {
    json!({
        "items": [{ "productId": "productA", "quantity": 2 }],
        "shippingAddress": {
            "street": "New Road",
            "city": "Kathmandu",
            "state": "Bagmati",
            "postalCode": "44600",
            "country": "Nepal"
        },
        "paymentMethod": "khalti",
        "transactionRef": "KH-778",
        "paymentProof": "https://cdn.storefront.test/proof.png"
    })
}

async fn place_order(client: &reqwest::Client, base: &str) -> Value {
    let resp = client
        .post(format!("{base}/orders"))
        .header("Authorization", BUYER)
        .json(&checkout_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_check() {
    let (_dir, base) = start_server().await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let (_dir, base) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/orders")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let resp = client
        .get(format!("{base}/orders"))
        .header("Authorization", "Bearer unknown")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn place_and_fulfill_order() {
    let (_dir, base) = start_server().await;
    let client = reqwest::Client::new();
    seed_product(&client, &base).await;

    let order = place_order(&client, &base).await;
    assert_eq!(order["totalAmount"], 1130);
    assert_eq!(order["paymentStatus"], "pending");
    assert_eq!(order["orderStatus"], "pending");
    let id = order["id"].as_str().unwrap().to_string();

    let resp = client
        .put(format!("{base}/orders/{id}"))
        .header("Authorization", ADMIN)
        .json(&json!({ "paymentStatus": "verified", "version": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["paymentStatus"], "verified");
    assert_eq!(body["stockWarnings"], json!([]));

    // shipping straight from pending skips processing
    let resp = client
        .put(format!("{base}/orders/{id}"))
        .header("Authorization", ADMIN)
        .json(&json!({ "orderStatus": "shipped", "trackingNumber": "TRK1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    // stale version
    let resp = client
        .put(format!("{base}/orders/{id}"))
        .header("Authorization", ADMIN)
        .json(&json!({ "orderStatus": "processing", "version": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .put(format!("{base}/orders/{id}"))
        .header("Authorization", ADMIN)
        .json(&json!({ "orderStatus": "processing", "version": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/orders/{id}"))
        .header("Authorization", BUYER)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["orderStatus"], "processing");
    assert_eq!(body["statusHistory"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn order_access_is_restricted() {
    let (_dir, base) = start_server().await;
    let client = reqwest::Client::new();
    seed_product(&client, &base).await;
    let order = place_order(&client, &base).await;
    let id = order["id"].as_str().unwrap();

    let resp = client
        .get(format!("{base}/orders/{id}"))
        .header("Authorization", OTHER)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .put(format!("{base}/orders/{id}"))
        .header("Authorization", BUYER)
        .json(&json!({ "paymentStatus": "verified" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .get(format!("{base}/orders/order_1missing"))
        .header("Authorization", ADMIN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{base}/orders/{id}/cancel"))
        .header("Authorization", BUYER)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["orderStatus"], "cancelled");
}

#[tokio::test]
async fn checkout_rejects_incomplete_requests() {
    let (_dir, base) = start_server().await;
    let client = reqwest::Client::new();
    seed_product(&client, &base).await;

    let mut body = checkout_body();
    body["transactionRef"] = json!("");
    let resp = client
        .post(format!("{base}/orders"))
        .header("Authorization", BUYER)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let resp = client
        .post(format!("{base}/orders"))
        .header("Authorization", BUYER)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn promo_codes_round_trip() {
    let (_dir, base) = start_server().await;
    let client = reqwest::Client::new();

    let promo = json!({
        "code": "tihar15",
        "discountPercentage": 15,
        "maxDiscount": 300,
        "minPurchase": 1000,
        "validFrom": "2020-01-01T00:00:00Z",
        "validTo": "2099-12-31T23:59:59Z",
        "isActive": true,
        "applicableCategories": ["apparel"]
    });

    let resp = client
        .post(format!("{base}/promocodes"))
        .header("Authorization", BUYER)
        .json(&promo)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .post(format!("{base}/promocodes"))
        .header("Authorization", ADMIN)
        .json(&promo)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["code"], "TIHAR15");
    assert_eq!(created["usageCount"], 0);

    let resp = client
        .post(format!("{base}/promocodes"))
        .header("Authorization", ADMIN)
        .json(&promo)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .post(format!("{base}/promocodes/validate"))
        .json(&json!({ "code": "Tihar15", "cartTotal": 4000, "categories": ["apparel"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let quote: Value = resp.json().await.unwrap();
    assert_eq!(quote["discountAmount"], 300);

    let resp = client
        .post(format!("{base}/promocodes/validate"))
        .json(&json!({ "code": "TIHAR15", "cartTotal": 500, "categories": ["apparel"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BELOW_MINIMUM");

    let resp = client
        .post(format!("{base}/promocodes/validate"))
        .json(&json!({ "code": "NOPE", "cartTotal": 4000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CODE_NOT_FOUND");
}

#[tokio::test]
async fn cart_merge_over_http() {
    let (_dir, base) = start_server().await;
    let client = reqwest::Client::new();
    seed_product(&client, &base).await;

    let resp = client
        .post(format!("{base}/cart"))
        .header("Authorization", BUYER)
        .json(&json!({ "productId": "productA", "quantity": 2, "size": "M" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/cart/merge"))
        .header("Authorization", BUYER)
        .json(&json!({ "items": [{ "productId": "productA", "quantity": 5, "size": "M" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cart: Value = resp.json().await.unwrap();
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    assert_eq!(cart["items"][0]["quantity"], 5);

    let resp = client
        .delete(format!("{base}/cart?productId=productA&size=M"))
        .header("Authorization", BUYER)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cart: Value = resp.json().await.unwrap();
    assert_eq!(cart["items"], json!([]));
}

#[tokio::test]
async fn malformed_cancel_body_is_rejected() {
    let (_dir, base) = start_server().await;
    let client = reqwest::Client::new();
    seed_product(&client, &base).await;
    let order = place_order(&client, &base).await;
    let id = order["id"].as_str().unwrap();

    let resp = client
        .post(format!("{base}/orders/{id}/cancel"))
        .header("Authorization", BUYER)
        .header("Content-Type", "application/json")
        .body("{\"note\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{base}/orders/{id}"))
        .header("Authorization", BUYER)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["orderStatus"], "pending");

    // a stale version is a conflict, the current one cancels
    let resp = client
        .post(format!("{base}/orders/{id}/cancel"))
        .header("Authorization", BUYER)
        .json(&json!({ "note": "changed my mind", "version": 7 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .post(format!("{base}/orders/{id}/cancel"))
        .header("Authorization", BUYER)
        .json(&json!({ "note": "changed my mind", "version": body["version"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["orderStatus"], "cancelled");
}
