//! Health check integration tests for entitlement-service.

mod common;

use common::TestApp;
use reqwest::Client;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/health", app.http_address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "entitlement-service");
}

#[tokio::test]
async fn health_check_reports_unavailable_store() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    app.memory.as_ref().unwrap().set_unavailable(true);

    let response = client
        .get(format!("{}/health", app.http_address))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 503);

    let ready = client
        .get(format!("{}/ready", app.http_address))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(ready.status().as_u16(), 503);
}

#[tokio::test]
async fn readiness_check_works() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", app.http_address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
}

#[tokio::test]
async fn metrics_endpoint_works() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/metrics", app.http_address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap_or("").contains("text/plain"))
        .unwrap_or(false));
}

#[tokio::test]
async fn grpc_health_reports_serving() {
    let app = TestApp::spawn().await;
    let channel = tonic::transport::Endpoint::new(app.grpc_address.clone())
        .expect("Invalid gRPC address")
        .connect()
        .await
        .expect("Failed to connect to gRPC server");
    let mut client = HealthClient::new(channel);

    let response = client
        .check(HealthCheckRequest {
            service: "marketplace.entitlement.v1.EntitlementService".to_string(),
        })
        .await
        .expect("Health check failed")
        .into_inner();

    // 1 = SERVING
    assert_eq!(response.status, 1);
}
