// Integration tests for `GatewayClient` using wiremock.

#![allow(clippy::unwrap_used)]

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use casa_gateway::types::AttributePatch;
use casa_gateway::{Error, GatewayClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, GatewayClient) {
    let server = MockServer::start().await;
    let client = GatewayClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_list_devices() {
    let (server, client) = setup().await;

    let body = json!([
        {
            "id": "lamp-1",
            "type": "light",
            "isReachable": true,
            "capabilities": { "canSend": [], "canReceive": ["isOn", "lightLevel"] },
            "attributes": { "customName": "Desk lamp", "isOn": true, "lightLevel": 80 }
        },
        {
            "id": "sensor-1",
            "type": "environmentSensor",
            "isReachable": true,
            "attributes": { "currentTemperature": 20.5, "batteryPercentage": 92 }
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].id, "lamp-1");
    assert_eq!(devices[0].display_name(), "Desk lamp");
    assert!(devices[0].capabilities.can_receive("lightLevel"));
    assert_eq!(devices[1].attributes.battery_percentage, Some(92));
}

#[tokio::test]
async fn test_list_device_sets() {
    let (server, client) = setup().await;

    let body = json!([
        { "id": "set-1", "name": "Living room lights" },
        { "id": "set-2", "name": "Bedroom" }
    ]);

    Mock::given(method("GET"))
        .and(path("/v1/device-sets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let sets = client.list_device_sets().await.unwrap();

    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].name, "Living room lights");
    assert_eq!(sets[1].id, "set-2");
}

#[tokio::test]
async fn test_set_attributes_sends_patch() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/devices/lamp-1"))
        .and(body_json(json!({ "attributes": { "lightLevel": 40 } })))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let patch = AttributePatch {
        light_level: Some(40),
        ..AttributePatch::default()
    };

    client.set_attributes("lamp-1", &patch).await.unwrap();
}

#[tokio::test]
async fn test_bearer_token_header() {
    let server = MockServer::start().await;
    let token = secrecy::SecretString::from("tok-123");
    let client = GatewayClient::new(&server.uri(), &token).unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .and(header("Authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();
    assert!(devices.is_empty());
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_maps_to_authentication_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&server)
        .await;

    let err = client.list_devices().await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
    assert!(err.is_auth_expired());
}

#[tokio::test]
async fn test_failed_mutation_maps_to_command_error() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/devices/lamp-1"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({ "message": "device unreachable" })),
        )
        .mount(&server)
        .await;

    let patch = AttributePatch {
        is_on: Some(true),
        ..AttributePatch::default()
    };

    let err = client.set_attributes("lamp-1", &patch).await.unwrap_err();
    match err {
        Error::Command { message, status } => {
            assert_eq!(status, 503);
            assert_eq!(message, "device unreachable");
        }
        other => panic!("expected Command error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_maps_to_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.list_devices().await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }));
}
