//! End-to-end gateway tests: real HTTP on loopback, stub downstream
//! services, stub identity provider.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use quorum_gateway::cache::MemoryCache;
use quorum_gateway::config::Config;
use quorum_gateway::gateway::{Gateway, IdentityProvider};
use quorum_gateway::token::TokenCodec;
use quorum_gateway::{Error, ExternalIdentity, Result};

const SECRET: &str = "integration-secret";
const API_KEY: &str = "integration-key";
const VALID_TOKEN: &str = "valid-provider-token";

struct StubIdentity;

#[async_trait]
impl IdentityProvider for StubIdentity {
    async fn verify(&self, token: &str) -> Result<ExternalIdentity> {
        if token == VALID_TOKEN {
            Ok(ExternalIdentity {
                subject: "ext_1".to_string(),
                email: Some("ada@example.com".to_string()),
                name: Some("Ada".to_string()),
            })
        } else {
            Err(Error::Unauthenticated("Invalid token".to_string()))
        }
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_user_service() -> SocketAddr {
    let app = Router::new().route(
        "/internal/users/external/{id}",
        get(|| async {
            Json(json!({
                "success": true,
                "data": {
                    "id": "usr_1",
                    "externalId": "ext_1",
                    "email": "ada@example.com",
                    "name": "Ada"
                }
            }))
        }),
    );
    serve(app).await
}

#[derive(Clone, Default)]
struct TeamServiceProbe {
    hits: Arc<AtomicUsize>,
    headers: Arc<Mutex<Option<HeaderMap>>>,
}

async fn spawn_team_service(probe: TeamServiceProbe) -> SocketAddr {
    async fn handler(State(probe): State<TeamServiceProbe>, headers: HeaderMap) -> Json<Value> {
        probe.hits.fetch_add(1, Ordering::SeqCst);
        *probe.headers.lock() = Some(headers);
        Json(json!({ "success": true, "data": [] }))
    }
    let app = Router::new()
        .route("/", get(handler))
        .with_state(probe);
    serve(app).await
}

fn test_config(user_addr: SocketAddr, team_addr: SocketAddr) -> Config {
    let mut config = Config::default();
    config.trust.internal_jwt_secret = SECRET.to_string();
    config.trust.internal_api_key = API_KEY.to_string();
    config.services.user_url = format!("http://{user_addr}");
    config.services.team_url = format!("http://{team_addr}");
    config
}

async fn spawn_gateway(config: Config) -> SocketAddr {
    let gateway = Gateway::new(config, Arc::new(StubIdentity), Arc::new(MemoryCache::new()))
        .expect("gateway construction");
    serve(gateway.router()).await
}

#[tokio::test]
async fn authenticated_request_reaches_downstream_with_trust_headers() {
    let user_addr = spawn_user_service().await;
    let probe = TeamServiceProbe::default();
    let team_addr = spawn_team_service(probe.clone()).await;
    let gateway = spawn_gateway(test_config(user_addr, team_addr)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{gateway}/api/teams"))
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "success": true, "data": [] }));
    assert_eq!(probe.hits.load(Ordering::SeqCst), 1);

    let headers = probe.headers.lock().take().expect("downstream headers");
    assert_eq!(headers.get("x-internal-api-key").unwrap(), API_KEY);
    assert_eq!(headers.get("x-user-id").unwrap(), "usr_1");
    assert_eq!(headers.get("x-user-email").unwrap(), "ada@example.com");
    // The provider token stays at the boundary
    assert!(headers.get("authorization").is_none());

    let internal = headers
        .get("x-internal-token")
        .and_then(|v| v.to_str().ok())
        .expect("internal token header");
    let principal = TokenCodec::new(SECRET).verify(internal).expect("verifiable token");
    assert_eq!(principal.user_id, "usr_1");
    assert_eq!(principal.external_id, "ext_1");
}

#[tokio::test]
async fn client_supplied_trust_headers_are_overwritten() {
    let user_addr = spawn_user_service().await;
    let probe = TeamServiceProbe::default();
    let team_addr = spawn_team_service(probe.clone()).await;
    let gateway = spawn_gateway(test_config(user_addr, team_addr)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gateway}/api/teams"))
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .header("x-user-id", "someone-else")
        .header("x-internal-token", "forged")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = probe.headers.lock().take().unwrap();
    assert_eq!(headers.get("x-user-id").unwrap(), "usr_1");
    assert_ne!(headers.get("x-internal-token").unwrap(), "forged");
}

#[tokio::test]
async fn missing_token_is_rejected_before_any_downstream_call() {
    let user_addr = spawn_user_service().await;
    let probe = TeamServiceProbe::default();
    let team_addr = spawn_team_service(probe.clone()).await;
    let gateway = spawn_gateway(test_config(user_addr, team_addr)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gateway}/api/teams"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "success": false, "error": "No token provided" }));
    assert_eq!(probe.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_token_is_rejected_with_the_uniform_message() {
    let user_addr = spawn_user_service().await;
    let probe = TeamServiceProbe::default();
    let team_addr = spawn_team_service(probe.clone()).await;
    let gateway = spawn_gateway(test_config(user_addr, team_addr)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gateway}/api/teams"))
        .header("authorization", "Bearer not-the-right-token")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(probe.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_prefix_is_a_404() {
    let user_addr = spawn_user_service().await;
    let probe = TeamServiceProbe::default();
    let team_addr = spawn_team_service(probe).await;
    let gateway = spawn_gateway(test_config(user_addr, team_addr)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gateway}/api/billing"))
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn health_needs_no_authentication() {
    let user_addr = spawn_user_service().await;
    let probe = TeamServiceProbe::default();
    let team_addr = spawn_team_service(probe).await;
    let gateway = spawn_gateway(test_config(user_addr, team_addr)).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gateway}/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn cached_get_hits_the_network_once_per_key_within_ttl() {
    use quorum_gateway::client::ServiceClient;
    use quorum_gateway::config::{CacheConfig, FailsafeConfig};

    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/teams/t1/members",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "success": true, "data": ["u1"] }))
            }),
        )
        .with_state(Arc::clone(&hits));
    let addr = serve(app).await;

    let client = ServiceClient::new(
        FailsafeConfig::default(),
        &CacheConfig::default(),
        Arc::new(MemoryCache::new()),
        API_KEY.into(),
    );
    let url = format!("http://{addr}/teams/t1/members");

    let first = client
        .get_cached("team-service", &url, "team:t1:members", Duration::from_secs(60))
        .await
        .unwrap();
    let second = client
        .get_cached("team-service", &url, "team:t1:members", Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(hits.load(Ordering::SeqCst), 1, "second get must be served from cache");

    // A zero TTL stores nothing, so every call goes to the network
    client
        .get_cached("team-service", &url, "team:t1:volatile", Duration::ZERO)
        .await
        .unwrap();
    client
        .get_cached("team-service", &url, "team:t1:volatile", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn circuit_opens_after_repeated_timeouts_and_short_circuits() {
    let user_addr = spawn_user_service().await;

    // A listener nobody accepts on: connections establish, requests hang
    // until the gateway's timeout fires.
    let black_hole = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let team_addr = black_hole.local_addr().unwrap();

    let mut config = test_config(user_addr, team_addr);
    config.failsafe.retry.max_retries = 0;
    config.failsafe.request_timeout = Duration::from_millis(300);
    config.failsafe.circuit_breaker.failure_threshold = 5;
    config.failsafe.circuit_breaker.cooldown = Duration::from_secs(30);
    let gateway = spawn_gateway(config).await;

    let client = reqwest::Client::new();
    for _ in 0..5 {
        let response = client
            .get(format!("http://{gateway}/api/teams"))
            .header("authorization", format!("Bearer {VALID_TOKEN}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({ "success": false, "error": "Service temporarily unavailable" })
        );
    }

    // Open circuit: the next request fails without waiting out the timeout
    let started = Instant::now();
    let response = client
        .get(format!("http://{gateway}/api/teams"))
        .header("authorization", format!("Bearer {VALID_TOKEN}"))
        .send()
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 500);
    assert!(
        elapsed < Duration::from_millis(150),
        "expected a short-circuited response, took {elapsed:?}"
    );
    drop(black_hole);
}
