use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use futures_util::{Stream, TryStreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use warp::http::header::{self, HeaderMap, HeaderValue};
use warp::http::StatusCode;
use warp::hyper::body::Buf;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::model::{now_millis, LocationRecord};
use crate::validate::validate;
use crate::TrailDb;

const MAX_BODY_BYTES: u64 = 100 * 1024;

#[derive(Serialize)]
struct PingReply {
    ok: bool,
    message: &'static str,
    port: u16,
}

#[derive(Serialize)]
struct SavedReply {
    saved: bool,
}

#[derive(Serialize)]
struct LatestReply {
    latest: Option<LocationRecord>,
}

#[derive(Serialize)]
struct HistoryReply {
    items: Vec<LocationRecord>,
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

pub struct TrailServer {
    db: Arc<TrailDb>,
    config: ServerConfig,
}

impl TrailServer {
    pub fn new(db: Arc<TrailDb>, config: ServerConfig) -> Self {
        Self { db, config }
    }

    /// Serves until Ctrl-C.
    pub async fn run(self) -> Result<(), warp::Error> {
        let routes = routes(self.db.clone(), &self.config);

        let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(self.config.addr(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for Ctrl-C: {}", e);
            }
        })?;

        info!("✅ Listening on http://{}", addr);
        server.await;
        info!("Shutting down.");
        Ok(())
    }
}

/// The complete route tree: JSON API, static front-end, CORS, security
/// headers and request tracing. Never rejects; every failure becomes a
/// JSON error reply.
pub fn routes(db: Arc<TrailDb>, config: &ServerConfig) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let port = config.port;

    // 1. GET /api/ping
    let ping = warp::get()
    .and(warp::path!("api" / "ping"))
    .map(move || json_reply(&PingReply { ok: true, message: "pong", port }, StatusCode::OK));

    // 2. POST /api/location
    let ingest = warp::post()
    .and(warp::path!("api" / "location"))
    .and(payload())
    .and(with_db(db.clone()))
    .and_then(handle_ingest);

    // 3. GET /api/latest?userId=
    let latest = warp::get()
    .and(warp::path!("api" / "latest"))
    .and(warp::query::<HashMap<String, String>>())
    .and(with_db(db.clone()))
    .and_then(handle_latest);

    // 4. GET /api/locations?userId=
    let history = warp::get()
    .and(warp::path!("api" / "locations"))
    .and(warp::query::<HashMap<String, String>>())
    .and(with_db(db))
    .and_then(handle_history);

    // --- FRONT-END ---

    let index = warp::get()
    .and(warp::path::end())
    .and(warp::fs::file(config.index_file()));

    let assets = warp::get().and(warp::fs::dir(config.public_dir.clone()));

    let cors = warp::cors()
    .allow_any_origin()
    .allow_methods(vec!["GET", "POST", "OPTIONS"])
    .allow_headers(vec!["content-type", "authorization", "accept", "x-requested-with", "cache-control"]);

    // CORS wraps the recovered replies so error bodies carry its headers too.
    // The outer recover only ever sees preflights CORS refused.
    ping.or(ingest)
    .or(latest)
    .or(history)
    .or(index)
    .or(assets)
    .recover(handle_rejection)
    .with(cors)
    .recover(handle_rejection)
    .with(warp::reply::with::headers(security_headers()))
    .with(warp::trace::request())
}

async fn handle_ingest(payload: Value, db: Arc<TrailDb>) -> Result<WithStatus<Json>, Rejection> {
    let record = match validate(&payload, now_millis()) {
        Ok(record) => record,
        Err(e) => {
            debug!("Rejected location: {}", e);
            return Ok(error_reply(e));
        }
    };

    info!(user_id = %record.user_id, "📍 [{}] {}, {} (acc={:?})", record.user_id, record.lat, record.lon, record.acc);

    let saved = tokio::task::spawn_blocking(move || db.append(record))
    .await
    .unwrap_or_else(|e| {
        error!("Store task failed: {}", e);
        false
    });

    // The client is told the fix was saved either way; the write failure
    // is only visible in the logs.
    if !saved {
        warn!("Location accepted but not persisted");
    }

    Ok(json_reply(&SavedReply { saved: true }, StatusCode::OK))
}

async fn handle_latest(query: HashMap<String, String>, db: Arc<TrailDb>) -> Result<WithStatus<Json>, Rejection> {
    let Some(user_id) = user_id_param(&query) else {
        return Ok(error_reply(ApiError::MissingUserId));
    };

    let latest = tokio::task::spawn_blocking(move || db.latest(&user_id))
    .await
    .unwrap_or_default();

    Ok(json_reply(&LatestReply { latest }, StatusCode::OK))
}

async fn handle_history(query: HashMap<String, String>, db: Arc<TrailDb>) -> Result<WithStatus<Json>, Rejection> {
    let Some(user_id) = user_id_param(&query) else {
        return Ok(error_reply(ApiError::MissingUserId));
    };

    let items = tokio::task::spawn_blocking(move || db.history(&user_id))
    .await
    .unwrap_or_default();

    Ok(json_reply(&HistoryReply { items }, StatusCode::OK))
}

async fn handle_rejection(rejection: Rejection) -> Result<WithStatus<Json>, Infallible> {
    let error = if let Some(error) = rejection.find::<ApiError>() {
        *error
    } else if rejection.find::<warp::cors::CorsForbidden>().is_some() {
        ApiError::CorsForbidden
    } else {
        debug!("Unmatched request: {:?}", rejection);
        ApiError::NotFound
    };

    Ok(error_reply(error))
}

/// The ingest body as JSON, whether it was sent as JSON or as a url-encoded
/// form.
fn payload() -> impl Filter<Extract = (Value,), Error = Rejection> + Clone {
    warp::header::optional::<String>("content-type")
    .and(bounded_body())
    .and_then(|content_type: Option<String>, body: Vec<u8>| async move {
        parse_payload(content_type.as_deref(), &body).map_err(warp::reject::custom)
    })
}

/// The raw request body, capped at `MAX_BODY_BYTES` with or without a
/// `Content-Length` header.
fn bounded_body() -> impl Filter<Extract = (Vec<u8>,), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
    .and(warp::body::stream())
    .and_then(read_body)
}

async fn read_body<S, B>(declared: Option<u64>, stream: S) -> Result<Vec<u8>, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if declared.is_some_and(|len| len > MAX_BODY_BYTES) {
        return Err(warp::reject::custom(ApiError::PayloadTooLarge));
    }
    read_limited(stream, MAX_BODY_BYTES).await.map_err(warp::reject::custom)
}

// Chunked bodies have no declared length, so the cap is enforced while reading.
async fn read_limited<S, B>(stream: S, limit: u64) -> Result<Vec<u8>, ApiError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    futures_util::pin_mut!(stream);
    let mut body = Vec::new();

    while let Some(mut chunk) = stream.try_next().await.map_err(|e| {
        debug!("Body read failed: {}", e);
        ApiError::InvalidPayload
    })? {
        if (body.len() + chunk.remaining()) as u64 > limit {
            return Err(ApiError::PayloadTooLarge);
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            let len = part.len();
            body.extend_from_slice(part);
            chunk.advance(len);
        }
    }

    Ok(body)
}

/// JSON unless the client says it sent a form. Form values are strings and
/// go through the same numeric coercion as JSON strings.
fn parse_payload(content_type: Option<&str>, body: &[u8]) -> Result<Value, ApiError> {
    let mime = content_type.map(|ct| ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());

    match mime.as_deref() {
        None | Some("application/json") => serde_json::from_slice(body).map_err(|_| ApiError::InvalidPayload),
        Some("application/x-www-form-urlencoded") => {
            let fields: Map<String, Value> = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
            Ok(Value::Object(fields))
        }
        Some(_) => Err(ApiError::InvalidPayload),
    }
}

fn user_id_param(query: &HashMap<String, String>) -> Option<String> {
    query.get("userId").filter(|id| !id.is_empty()).cloned()
}

fn security_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(header::X_DNS_PREFETCH_CONTROL, HeaderValue::from_static("off"));
    headers
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(error: ApiError) -> WithStatus<Json> {
    json_reply(&ErrorReply { error: error.to_string() }, error.status())
}

fn with_db(db: Arc<TrailDb>) -> impl Filter<Extract = (Arc<TrailDb>,), Error = Infallible> + Clone {
    warp::any().map(move || db.clone())
}
