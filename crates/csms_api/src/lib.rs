//! CSMS API Library
//!
//! This library provides the HTTP and WebSocket surface of the Electra OCPP
//! central system: the socket stations connect to, health endpoints, and the
//! operator endpoints to inspect stations and trigger remote operations.

mod app_state;
pub mod config;
mod remote;
mod station;
mod ws;

pub use crate::app_state::AppState;
pub use crate::ws::OCPP_SUBPROTOCOL;

use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Station {0} is not connected")]
    StationNotConnected(String),
    #[error("Connection to station {0} is closed")]
    ConnectionClosed(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::StationNotConnected(_) => StatusCode::NOT_FOUND,
            ApiError::ConnectionClosed(_) => StatusCode::BAD_GATEWAY,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: String,
}

/// Liveness endpoint
pub async fn root() -> &'static str {
    "Electra CSMS is running"
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Create the application router with all endpoints
pub fn create_app(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ocpp/{charge_point_id}", get(ws::ocpp_upgrade))
        .route("/stations", get(station::get_stations))
        .route("/transactions", get(station::get_transactions))
        .route(
            "/stations/{charge_point_id}/remote-start",
            post(remote::remote_start),
        )
        .route(
            "/stations/{charge_point_id}/remote-stop",
            post(remote::remote_stop),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Periodically evict server-initiated calls whose reply never came.
pub fn spawn_call_sweeper(app_state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let expired = app_state.central().expire_calls(Utc::now());
            if !expired.is_empty() {
                tracing::info!("Expired {} pending call(s)", expired.len());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use csms_engine::{CallOutcome, EngineConfig};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
    use tower::util::ServiceExt;

    type Station = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    pub fn create_test_app() -> Router {
        Router::new()
            .route("/", get(root))
            .route("/health", get(health_check))
    }

    async fn serve(app_state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_app(app_state)).await.unwrap();
        });
        addr
    }

    async fn connect(addr: SocketAddr, charge_point_id: &str) -> Station {
        let (station, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/ocpp/{}", addr, charge_point_id))
                .await
                .unwrap();
        station
    }

    async fn exchange(station: &mut Station, frame: Value) -> Value {
        station.send(Message::Text(frame.to_string())).await.unwrap();
        receive(station).await
    }

    async fn receive(station: &mut Station) -> Value {
        loop {
            let message = station.next().await.unwrap().unwrap();
            if message.is_text() {
                return serde_json::from_str(&message.into_text().unwrap()).unwrap();
            }
        }
    }

    async fn boot(station: &mut Station, unique_id: &str) -> Value {
        exchange(
            station,
            json!([2, unique_id, "BootNotification", {"chargePointModel": "X1", "chargePointVendor": "Acme"}]),
        )
        .await
    }

    async fn start_transaction(station: &mut Station, unique_id: &str) -> i64 {
        let reply = exchange(
            station,
            json!([2, unique_id, "StartTransaction", {"connectorId": 1, "idTag": "abc", "meterStart": 100, "timestamp": "2024-01-01T00:00:00Z"}]),
        )
        .await;
        assert_eq!(reply[1], unique_id);
        reply[2]["transactionId"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert!(chrono::DateTime::parse_from_rfc3339(&health.time).is_ok());
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Electra CSMS is running");
    }

    #[tokio::test]
    async fn test_integration_boot_and_transaction() {
        let app_state = AppState::new(EngineConfig::default());
        let addr = serve(app_state.clone()).await;
        let mut station = connect(addr, "CP001").await;

        let reply = boot(&mut station, "1").await;
        assert_eq!(reply[0], 3);
        assert_eq!(reply[1], "1");
        assert_eq!(reply[2]["status"], "Accepted");
        assert_eq!(reply[2]["interval"], 300);
        assert!(reply[2]["currentTime"].is_string());

        let transaction_id = start_transaction(&mut station, "2").await;
        assert_eq!(transaction_id, 1);

        let reply = exchange(
            &mut station,
            json!([2, "3", "StopTransaction", {"transactionId": 1}]),
        )
        .await;
        assert_eq!(reply, json!([3, "3", {"idTagInfo": {"status": "Accepted"}}]));

        let reply = exchange(&mut station, json!([2, "4", "FooBar", {}])).await;
        assert_eq!(reply[0], 4);
        assert_eq!(reply[1], "4");
        assert_eq!(reply[2], "NotSupported");
    }

    #[tokio::test]
    async fn test_integration_garbage_gets_no_reply() {
        let app_state = AppState::new(EngineConfig::default());
        let addr = serve(app_state).await;
        let mut station = connect(addr, "CP001").await;

        station
            .send(Message::Text("not even json".to_string()))
            .await
            .unwrap();
        // The next reply on the socket belongs to the heartbeat
        let reply = exchange(&mut station, json!([2, "hb", "Heartbeat", {}])).await;
        assert_eq!(reply[1], "hb");
    }

    #[tokio::test]
    async fn test_integration_two_stations_share_counter() {
        let app_state = AppState::new(EngineConfig::default());
        let addr = serve(app_state.clone()).await;
        let mut first = connect(addr, "CP001").await;
        let mut second = connect(addr, "CP002").await;
        boot(&mut first, "b1").await;
        boot(&mut second, "b2").await;

        let ids = vec![
            start_transaction(&mut first, "s1").await,
            start_transaction(&mut second, "s2").await,
            start_transaction(&mut first, "s3").await,
        ];

        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(app_state.central().sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_integration_remote_start() {
        let app_state = AppState::new(EngineConfig::default());
        let addr = serve(app_state.clone()).await;
        let mut station = connect(addr, "CP001").await;
        boot(&mut station, "1").await;

        let app = create_app(app_state.clone());
        let request = tokio::spawn(async move {
            app.oneshot(
                Request::builder()
                    .uri("/stations/CP001/remote-start")
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"connectorId":1,"idTag":"abc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap()
        });

        let call = receive(&mut station).await;
        assert_eq!(call[0], 2);
        assert_eq!(call[2], "RemoteStartTransaction");
        assert_eq!(call[3], json!({"connectorId": 1, "idTag": "abc"}));
        station
            .send(Message::Text(
                json!([3, call[1], {"status": "Accepted"}]).to_string(),
            ))
            .await
            .unwrap();

        let response = request.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["correlationId"], call[1]);
        assert_eq!(body["outcome"]["kind"], "result");
    }

    #[tokio::test]
    async fn test_integration_close_removes_session() {
        let app_state = AppState::new(EngineConfig::default());
        let addr = serve(app_state.clone()).await;
        let mut station = connect(addr, "CP001").await;
        boot(&mut station, "1").await;
        start_transaction(&mut station, "2").await;
        assert_eq!(app_state.central().sessions().len(), 1);

        station.close(None).await.unwrap();

        for _ in 0..100 {
            if app_state.central().sessions().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(app_state.central().sessions().is_empty());
        assert!(app_state.connections().lookup("CP001").is_none());
        // Transactions outlive the connection
        assert_eq!(app_state.central().transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_call_sweeper_times_out_calls() {
        let app_state = AppState::new(EngineConfig {
            call_timeout: Duration::ZERO,
            ..EngineConfig::default()
        });
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        app_state.connect("CP001", tx);
        let issued = app_state
            .issue("CP001", |central, connection_id| {
                central.remote_stop_transaction(connection_id, 1)
            })
            .unwrap();

        let sweeper = spawn_call_sweeper(app_state.clone(), Duration::from_millis(10));
        let outcome = tokio::time::timeout(Duration::from_secs(5), issued.outcome)
            .await
            .unwrap()
            .unwrap();
        sweeper.abort();

        assert_eq!(outcome, CallOutcome::TimedOut);
        assert!(app_state.central().tracker().is_empty());
    }
}
