use clap::Parser;
use geotrail::config::ServerConfig;
use geotrail::server::routes;
use geotrail::TrailDb;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use warp::http::Response;
use warp::hyper::body::Bytes;

struct TestApp {
    dir: TempDir,
    config: ServerConfig,
    db: Arc<TrailDb>,
}

impl TestApp {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let public = dir.path().join("public");
        fs::create_dir(&public).unwrap();
        fs::write(public.join("index.html"), "<h1>geotrail</h1>").unwrap();
        fs::write(public.join("app.js"), "console.log('map');").unwrap();

        let config = ServerConfig::try_parse_from([
            "geotrail",
            "--port",
            "3000",
            "--host",
            "127.0.0.1",
            "--token",
            "test-token",
            "--data-dir",
            dir.path().join("data").to_str().unwrap(),
            "--public-dir",
            public.to_str().unwrap(),
        ])
        .unwrap();
        let db = Arc::new(TrailDb::open(&config.db_file()).unwrap());

        Self { dir, config, db }
    }

    /// A store whose file path is a non-empty directory, so every write fails.
    fn with_unwritable_store() -> Self {
        let mut app = Self::new();
        let data = app.dir.path().join("broken");
        fs::create_dir_all(data.join("locations.json")).unwrap();
        fs::write(data.join("locations.json").join("blocker"), "x").unwrap();
        app.config.data_dir = data;
        app.db = Arc::new(TrailDb::open(&app.config.db_file()).unwrap());
        app
    }

    async fn post_json(&self, body: Value) -> Response<Bytes> {
        warp::test::request()
        .method("POST")
        .path("/api/location")
        .json(&body)
        .reply(&routes(self.db.clone(), &self.config))
        .await
    }

    async fn get(&self, path: &str) -> Response<Bytes> {
        warp::test::request()
        .method("GET")
        .path(path)
        .reply(&routes(self.db.clone(), &self.config))
        .await
    }
}

fn body_json(resp: &Response<Bytes>) -> Value {
    serde_json::from_slice(resp.body()).unwrap()
}

#[tokio::test]
async fn ping_reports_port() {
    let app = TestApp::new();

    let resp = app.get("/api/ping").await;

    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(&resp), json!({ "ok": true, "message": "pong", "port": 3000 }));
}

#[tokio::test]
async fn ingest_then_latest() {
    let app = TestApp::new();

    let resp = app.post_json(json!({ "userId": "u1", "lat": 40.4, "lon": -3.7 })).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(&resp), json!({ "saved": true }));

    let resp = app.get("/api/latest?userId=u1").await;
    assert_eq!(resp.status(), 200);
    let body = body_json(&resp);
    let latest = &body["latest"];
    assert_eq!(latest["userId"], "u1");
    assert_eq!(latest["lat"], 40.4);
    assert_eq!(latest["lon"], -3.7);
    assert_eq!(latest["acc"], Value::Null);
    assert_eq!(latest["provider"], Value::Null);
    assert!(latest["ts"].is_i64());
}

#[tokio::test]
async fn history_appends_new_record_last_with_identical_fields() {
    let app = TestApp::new();
    app.post_json(json!({ "userId": "u1", "lat": 1, "lon": 1, "ts": 10 })).await;
    app.post_json(json!({ "userId": "u2", "lat": 2, "lon": 2, "ts": 20 })).await;
    let sent = json!({ "userId": "u1", "lat": -33.86, "lon": 151.2, "ts": 1_700_000_000_000_i64, "acc": 4.5, "provider": "gps" });

    app.post_json(sent.clone()).await;

    let resp = app.get("/api/locations?userId=u1").await;
    assert_eq!(resp.status(), 200);
    let items = body_json(&resp)["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["ts"], 10);
    assert_eq!(items[1], sent);
}

#[rstest]
#[case(json!({ "userId": "u1", "lat": 95, "lon": 0 }))]
#[case(json!({ "userId": "u1", "lat": 91, "lon": 0 }))]
#[case(json!({ "userId": "u1", "lat": -91, "lon": 0 }))]
#[case(json!({ "userId": "u1", "lat": 0, "lon": 181 }))]
#[case(json!({ "userId": "u1", "lat": 0, "lon": -181 }))]
#[tokio::test]
async fn out_of_range_is_rejected_and_store_unchanged(#[case] payload: Value) {
    let app = TestApp::new();

    let resp = app.post_json(payload).await;

    assert_eq!(resp.status(), 400);
    assert_eq!(body_json(&resp), json!({ "error": "Out of range" }));
    assert!(app.db.load_all().is_empty());
}

#[rstest]
#[case(json!({ "lat": 1, "lon": 1 }))]
#[case(json!({ "userId": "", "lat": 1, "lon": 1 }))]
#[case(json!({ "userId": "u1", "lat": "abc", "lon": 1 }))]
#[case(json!({ "userId": "u1", "lat": 1 }))]
#[tokio::test]
async fn invalid_payload_is_rejected(#[case] payload: Value) {
    let app = TestApp::new();

    let resp = app.post_json(payload).await;

    assert_eq!(resp.status(), 400);
    assert_eq!(body_json(&resp), json!({ "error": "Invalid payload" }));
    assert!(app.db.load_all().is_empty());
}

#[tokio::test]
async fn malformed_json_is_an_invalid_payload() {
    let app = TestApp::new();

    let resp = warp::test::request()
    .method("POST")
    .path("/api/location")
    .header("content-type", "application/json")
    .body("{\"userId\": \"u1\", ")
    .reply(&routes(app.db.clone(), &app.config))
    .await;

    assert_eq!(resp.status(), 400);
    assert_eq!(body_json(&resp), json!({ "error": "Invalid payload" }));
}

#[tokio::test]
async fn empty_body_is_an_invalid_payload() {
    let app = TestApp::new();

    let resp = warp::test::request()
    .method("POST")
    .path("/api/location")
    .body("")
    .reply(&routes(app.db.clone(), &app.config))
    .await;

    assert_eq!(resp.status(), 400);
    assert_eq!(body_json(&resp), json!({ "error": "Invalid payload" }));
}

#[tokio::test]
async fn form_encoded_ingest_is_accepted() {
    let app = TestApp::new();

    let resp = warp::test::request()
    .method("POST")
    .path("/api/location")
    .header("content-type", "application/x-www-form-urlencoded")
    .body("userId=u7&lat=48.85&lon=2.35&acc=20&provider=network&ts=1690000000000")
    .reply(&routes(app.db.clone(), &app.config))
    .await;

    assert_eq!(resp.status(), 200);
    let latest = app.db.latest("u7").unwrap();
    assert_eq!(latest.lat, 48.85);
    assert_eq!(latest.lon, 2.35);
    assert_eq!(latest.acc, Some(20.0));
    assert_eq!(latest.provider.as_deref(), Some("network"));
    assert_eq!(latest.ts, 1_690_000_000_000);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = TestApp::new();
    let padding = "x".repeat(200 * 1024);

    let resp = app.post_json(json!({ "userId": "u1", "lat": 1, "lon": 1, "provider": padding })).await;

    assert_eq!(resp.status(), 413);
    assert_eq!(body_json(&resp), json!({ "error": "Payload too large" }));
}

#[tokio::test]
async fn chunked_ingest_is_accepted() {
    let app = TestApp::new();
    let (addr, server) = warp::serve(routes(app.db.clone(), &app.config)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let body = r#"{"userId":"u1","lat":40.4,"lon":-3.7}"#;
    let request = format!(
        "POST /api/location HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n{:x}\r\n{}\r\n0\r\n\r\n",
        addr,
        body.len(),
        body
    );
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.ends_with(r#"{"saved":true}"#), "{}", response);
    let latest = app.db.latest("u1").unwrap();
    assert_eq!((latest.lat, latest.lon), (40.4, -3.7));
}

#[rstest]
#[case("/api/latest")]
#[case("/api/latest?userId=")]
#[case("/api/locations")]
#[case("/api/locations?user=u1")]
#[tokio::test]
async fn queries_require_user_id(#[case] path: &str) {
    let app = TestApp::new();

    let resp = app.get(path).await;

    assert_eq!(resp.status(), 400);
    assert_eq!(body_json(&resp), json!({ "error": "userId required" }));
}

#[tokio::test]
async fn unknown_user_has_no_data() {
    let app = TestApp::new();
    app.post_json(json!({ "userId": "u1", "lat": 1, "lon": 1 })).await;

    let latest = app.get("/api/latest?userId=ghost").await;
    let history = app.get("/api/locations?userId=ghost").await;

    assert_eq!(latest.status(), 200);
    assert_eq!(body_json(&latest), json!({ "latest": null }));
    assert_eq!(history.status(), 200);
    assert_eq!(body_json(&history), json!({ "items": [] }));
}

#[tokio::test]
async fn corrupt_store_degrades_to_no_data() {
    let app = TestApp::new();
    fs::write(app.config.db_file(), "[{ oops").unwrap();

    let resp = app.get("/api/locations?userId=u1").await;

    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(&resp), json!({ "items": [] }));
}

#[tokio::test]
async fn failed_write_still_reports_saved() {
    let app = TestApp::with_unwritable_store();

    let resp = app.post_json(json!({ "userId": "u1", "lat": 1, "lon": 1 })).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(&resp), json!({ "saved": true }));
    assert_eq!(app.db.latest("u1"), None);
}

#[tokio::test]
async fn serves_front_end() {
    let app = TestApp::new();

    let index = app.get("/").await;
    let asset = app.get("/app.js").await;

    assert_eq!(index.status(), 200);
    assert_eq!(index.body().as_ref(), b"<h1>geotrail</h1>");
    assert_eq!(asset.status(), 200);
    assert_eq!(asset.body().as_ref(), b"console.log('map');");
}

#[tokio::test]
async fn unknown_route_is_a_json_404() {
    let app = TestApp::new();

    let resp = app.get("/api/nothing-here").await;

    assert_eq!(resp.status(), 404);
    assert_eq!(body_json(&resp), json!({ "error": "Not found" }));
}

#[tokio::test]
async fn replies_carry_security_and_cors_headers() {
    let app = TestApp::new();

    let resp = warp::test::request()
    .method("GET")
    .path("/api/ping")
    .header("origin", "http://example.com")
    .reply(&routes(app.db.clone(), &app.config))
    .await;

    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.headers()["x-frame-options"], "SAMEORIGIN");
    assert!(resp.headers().contains_key("access-control-allow-origin"));
}

#[rstest]
#[case("POST", "/api/location", "{", 400)]
#[case("GET", "/api/latest", "", 400)]
#[case("GET", "/api/nothing-here", "", 404)]
#[tokio::test]
async fn cross_origin_error_replies_carry_cors_headers(#[case] method: &str, #[case] path: &str, #[case] body: &str, #[case] status: u16) {
    let app = TestApp::new();

    let resp = warp::test::request()
    .method(method)
    .path(path)
    .header("origin", "http://example.com")
    .header("content-type", "application/json")
    .body(body)
    .reply(&routes(app.db.clone(), &app.config))
    .await;

    assert_eq!(resp.status(), status);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
}

#[rstest]
#[case("content-type")]
#[case("authorization")]
#[case("content-type, authorization, x-requested-with")]
#[tokio::test]
async fn preflight_allows_common_request_headers(#[case] requested: &str) {
    let app = TestApp::new();

    let resp = warp::test::request()
    .method("OPTIONS")
    .path("/api/location")
    .header("origin", "http://example.com")
    .header("access-control-request-method", "POST")
    .header("access-control-request-headers", requested)
    .reply(&routes(app.db.clone(), &app.config))
    .await;

    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn refused_preflight_is_a_json_403() {
    let app = TestApp::new();

    let resp = warp::test::request()
    .method("OPTIONS")
    .path("/api/location")
    .header("origin", "http://example.com")
    .header("access-control-request-method", "DELETE")
    .reply(&routes(app.db.clone(), &app.config))
    .await;

    assert_eq!(resp.status(), 403);
    assert_eq!(body_json(&resp), json!({ "error": "CORS request forbidden" }));
}
