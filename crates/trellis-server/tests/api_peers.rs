use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use trellis_federation::directory::insert_peer;
use trellis_federation::{Federation, FederationSettings, LocalPresence, PEER_BATCH_SIZE};
use trellis_server::{app, AppState};
use trellis_types::{ApprovalState, Peer, PeerDescriptor};

const ADMIN_TOKEN: &str = "operator-secret";

fn setup_app(admin_token: &str) -> (Router, TempDir) {
    let (router, _pool, dir) = setup_app_with_pool(admin_token);
    (router, dir)
}

fn setup_app_with_pool(admin_token: &str) -> (Router, trellis_db::DbPool, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let pool = trellis_db::create_pool(
        dir.path().join("node.db").to_str().unwrap(),
        trellis_db::DbRuntimeSettings::default(),
    )
    .unwrap();
    trellis_db::run_migrations(&pool.get().unwrap()).unwrap();

    let presence = LocalPresence::new(PeerDescriptor {
        hostname: "local".to_string(),
        domain: "test.invalid".to_string(),
        local_ip_address: "10.0.0.1".to_string(),
        external_ip_address: "1.2.3.4".to_string(),
        mac: "cc:dd".to_string(),
        ..Default::default()
    });
    let settings = FederationSettings {
        keys_dir: dir.path().join("keys"),
        hosts_file: dir.path().join("hosts"),
        remote_timeout_secs: 1,
        ..Default::default()
    };
    let federation = Federation::new(pool.clone(), presence, &settings).unwrap();

    let router = app(AppState {
        federation,
        admin_token: admin_token.to_string(),
    });
    (router, pool, dir)
}

fn inbound_body(mac: &str) -> Value {
    json!({
        "peer": {
            "hostname": "alpha",
            "domain": "test.invalid",
            "protocol": "http",
            "port_http": 9,
            "local_ip_address": "10.0.0.5",
            "external_ip_address": "5.6.7.8",
            "mac": mac,
        },
        "public_key": hex::encode(SigningKey::generate(&mut OsRng).verifying_key().to_bytes()),
    })
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn json_of(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["status"], "ok");
}

#[tokio::test]
async fn inbound_registration_is_public_and_pending() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);

    let (status, body) = send(
        &app,
        "POST",
        "/api/peers/register",
        None,
        Some(inbound_body("AA:BB")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = json_of(&body);
    assert_eq!(json["approval_state"], "PENDING");
    assert_eq!(json["peer"]["mac"], "cc:dd");
    assert_eq!(json["public_key"].as_str().unwrap().len(), 64);

    let (status, body) = send(&app, "GET", "/api/peers/aa:bb/state", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["state"], "PENDING");
}

#[tokio::test]
async fn self_registration_is_a_bad_request() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);
    let (status, body) = send(
        &app,
        "POST",
        "/api/peers/register",
        None,
        Some(inbound_body("CC:DD")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["error"], "can not register peer to itself");
}

#[tokio::test]
async fn operator_routes_require_admin_token() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);
    send(
        &app,
        "POST",
        "/api/peers/register",
        None,
        Some(inbound_body("aa:bb")),
    )
    .await;

    let accept = json!({ "peer": { "mac": "aa:bb" } });
    let (status, _) = send(&app, "POST", "/api/peers/accept", None, Some(accept.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/api/peers/accept",
        Some("wrong"),
        Some(accept.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        "POST",
        "/api/peers/accept",
        Some(ADMIN_TOKEN),
        Some(accept),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = json_of(&body);
    assert_eq!(json["success"], true);
    assert_eq!(json["peer"]["state"], "ACCEPTED");
    assert_eq!(json["peer"]["actions"].as_array().unwrap().len(), 5);

    let (status, body) = send(
        &app,
        "GET",
        "/api/authz/peer-action?mac=aa:bb&action=/dns.DnsService/SetA",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["allowed"], true);
}

#[tokio::test]
async fn empty_admin_token_disables_operator_routes() {
    let (app, _dir) = setup_app("");
    let (status, _) = send(&app, "GET", "/api/peers", Some(""), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // An outbound join is an operator action too.
    let (status, _) = send(
        &app,
        "POST",
        "/api/peers/register",
        None,
        Some(json!({ "peer": { "hostname": "remote.test.invalid" } })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_peers_streams_ndjson_batches() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);
    for mac in ["aa:01", "aa:02", "aa:03"] {
        send(
            &app,
            "POST",
            "/api/peers/register",
            None,
            Some(inbound_body(mac)),
        )
        .await;
    }

    let (status, body) = send(&app, "GET", "/api/peers", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    let batch: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(batch["peers"].as_array().unwrap().len(), 3);

    let (status, body) = send(
        &app,
        "GET",
        "/api/peers?state=ACCEPTED",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn action_routes_apply_set_changes() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);
    for mac in ["aa:01", "aa:02"] {
        send(
            &app,
            "POST",
            "/api/peers/register",
            None,
            Some(inbound_body(mac)),
        )
        .await;
    }

    let (status, body) = send(
        &app,
        "POST",
        "/api/peers/actions",
        Some(ADMIN_TOKEN),
        Some(json!({ "mac": "aa:01", "actions": ["old.Method", "old.Method", "keep"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_of(&body)["peer"]["actions"],
        json!(["old.Method", "keep"])
    );

    let (status, _) = send(
        &app,
        "POST",
        "/api/peers/actions/remove",
        Some(ADMIN_TOKEN),
        Some(json!({ "mac": "aa:02", "action": "old.Method" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        "POST",
        "/api/peers/actions/remove-all",
        Some(ADMIN_TOKEN),
        Some(json!({ "action": "old.Method" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["peers"], json!(["aa:01"]));
}

#[tokio::test]
async fn deleted_peer_is_gone() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);
    send(
        &app,
        "POST",
        "/api/peers/register",
        None,
        Some(inbound_body("aa:bb")),
    )
    .await;

    let delete = json!({ "peer": { "mac": "aa:bb" } });
    let (status, _) = send(
        &app,
        "POST",
        "/api/peers/delete",
        Some(ADMIN_TOKEN),
        Some(delete.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/api/peers/aa:bb/state", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/api/peers/aa:bb/public-key", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        "/api/peers/delete",
        Some(ADMIN_TOKEN),
        Some(delete),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn local_peer_and_own_key_are_public() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);

    let (status, body) = send(&app, "GET", "/api/peers/self", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let json = json_of(&body);
    assert_eq!(json["hostname"], "local");
    assert_eq!(json["mac"], "cc:dd");

    let (status, body) = send(&app, "GET", "/api/peers/cc:dd/public-key", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let json = json_of(&body);
    assert_eq!(json["public_key"].as_str().unwrap().len(), 64);
    assert_eq!(json["fingerprint"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn published_events_reach_local_subscribers() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);
    let (status, _) = send(
        &app,
        "POST",
        "/api/events/publish",
        None,
        Some(json!({ "topic": "update_peer_cc:dd_evt", "payload": { "state": "ACCEPTED" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/api/events/publish",
        None,
        Some(json!({ "topic": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn ndjson_batches(body: &[u8]) -> Vec<Vec<Value>> {
    String::from_utf8(body.to_vec())
        .unwrap()
        .lines()
        .map(|line| {
            let batch: Value = serde_json::from_str(line).unwrap();
            batch["peers"].as_array().cloned().unwrap()
        })
        .collect()
}

#[tokio::test]
async fn get_peers_streams_one_line_per_page() {
    let (app, pool, _dir) = setup_app_with_pool(ADMIN_TOKEN);
    {
        let conn = pool.get().unwrap();
        for i in 0..(PEER_BATCH_SIZE + 5) {
            let descriptor = PeerDescriptor {
                hostname: format!("host{i}"),
                mac: format!("aa:{i:04}"),
                ..Default::default()
            };
            insert_peer(&conn, &Peer::new(descriptor, ApprovalState::Pending)).unwrap();
        }
    }

    let (status, body) = send(&app, "GET", "/api/peers", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    let batches = ndjson_batches(&body);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), PEER_BATCH_SIZE);
    assert_eq!(batches[1].len(), 5);
    let all: Vec<Value> = batches.into_iter().flatten().collect();

    let (_, body) = send(
        &app,
        "GET",
        "/api/peers?limit=3&offset=2",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    let batches = ndjson_batches(&body);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], all[2..5].to_vec());
}

#[tokio::test]
async fn forwarding_to_a_remote_node_requires_admin_token() {
    let (app, _dir) = setup_app(ADMIN_TOKEN);
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let remote = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    for route in ["state", "public-key"] {
        let uri = format!("/api/peers/cc:dd/{route}?remote={remote}");
        let (status, _) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // With the token the call goes out and the closed port surfaces as 502.
        let (status, _) = send(&app, "GET", &uri, Some(ADMIN_TOKEN), None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    let (status, _) = send(&app, "GET", "/api/peers/cc:dd/state?remote=", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registration_with_hostile_names_is_a_bad_request() {
    let (app, dir) = setup_app(ADMIN_TOKEN);

    let mut body = inbound_body("aa:bb");
    body["peer"]["hostname"] = json!("x\n6.6.6.6\tbank.com\n#");
    body["peer"]["external_ip_address"] = json!("1.2.3.4");
    let (status, _) = send(&app, "POST", "/api/peers/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = inbound_body("aa:bb");
    body["peer"]["local_ip_address"] = json!("not-an-ip");
    let (status, _) = send(&app, "POST", "/api/peers/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(!dir.path().join("hosts").exists());
    let (status, _) = send(&app, "GET", "/api/peers/aa:bb/state", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
