//! Axum router construction and S3 route mapping.
//!
//! S3 distinguishes operations by query parameters, not just path+method.
//! For example, `GET /:bucket` could be ListObjectsV2 (no special query),
//! GetBucketLocation (`?location`), GetBucketAcl (`?acl`), or
//! ListMultipartUploads (`?uploads`). We use a single handler per
//! method+path that dispatches internally based on query params.

use crate::api::handlers::{bucket, multipart, object};
use crate::api::S3Error;
use crate::auth::{sigv4_auth_middleware, Identity};
use crate::metrics::{http_metrics_middleware, metrics_handler};
use crate::AppState;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Extension, Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, head, post, put},
    Json, Router,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the axum [`Router`] with all S3-compatible routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let metrics_enabled = state.config.observability.metrics;
    let health_check_enabled = state.config.observability.health_check;

    // Phase 1: build the stateful router (Router<Arc<AppState>>).
    let mut stateful = Router::new()
        // Always served; probe depth depends on config.
        .route("/health", get(health_check));

    if metrics_enabled {
        stateful = stateful.route("/metrics", get(metrics_handler));
    }

    if health_check_enabled {
        stateful = stateful
            .route("/healthz", get(healthz_handler))
            .route("/readyz", get(readyz_handler));
    }

    stateful = stateful
        // Service-level: GET / -> ListBuckets; everything else is 405.
        .route(
            "/",
            get(handle_get_service).fallback(|| async { S3Error::MethodNotAllowed }),
        )
        // Bucket-level routes
        .route("/:bucket", get(handle_get_bucket))
        .route("/:bucket", put(handle_put_bucket))
        .route("/:bucket", delete(handle_delete_bucket))
        .route("/:bucket", head(handle_head_bucket))
        .route("/:bucket", post(handle_post_bucket))
        // Object-level routes (wildcard key captures slashes)
        .route("/:bucket/*key", get(handle_get_object))
        .route("/:bucket/*key", put(handle_put_object))
        .route("/:bucket/*key", delete(handle_delete_object))
        .route("/:bucket/*key", head(handle_head_object))
        .route("/:bucket/*key", post(handle_post_object));

    // Phase 2: apply state and layers (converts to Router<()>).
    // Layer ordering: inner layers run first, outer layers wrap them.
    // auth is innermost (closest to handlers, after routing).
    let mut router = stateful
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            sigv4_auth_middleware,
        ))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http());

    if metrics_enabled {
        router = router.layer(middleware::from_fn_with_state(
            state,
            http_metrics_middleware,
        ));
    }

    router
        // CORS outermost so OPTIONS preflight is answered before auth.
        .layer(CorsLayer::permissive())
        // Objects can be large; the default 2MB cap does not apply here.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds the standard S3 response headers to every response:
/// - `x-amz-request-id`: 16-character uppercase hex string
/// - `x-amz-id-2`: Base64-encoded 24-byte random value (extended request id)
/// - `Date`: RFC 7231 timestamp
/// - `Server: BleepStore`
async fn common_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // The error renderer may have set the request id already.
    if !headers.contains_key("x-amz-request-id") {
        let request_id = crate::api::errors::generate_request_id();
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            headers.insert("x-amz-request-id", v);
        }
    }

    if !headers.contains_key("x-amz-id-2") {
        use base64::Engine;
        let random_bytes: [u8; 24] = rand::random();
        let id2 = base64::engine::general_purpose::STANDARD.encode(random_bytes);
        if let Ok(v) = HeaderValue::from_str(&id2) {
            headers.insert("x-amz-id-2", v);
        }
    }

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(v) = HeaderValue::from_str(&date) {
        headers.insert("date", v);
    }
    headers.insert("server", HeaderValue::from_static("BleepStore"));

    response
}

// -- Health check endpoints ---------------------------------------------------

/// `GET /health` -- JSON health status.
///
/// With deep checks enabled, probes the metadata store and storage backend
/// and reports per-component latency; degraded components turn the response
/// into a 503. Otherwise a static `{"status":"ok"}`.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.config.observability.health_check {
        return (StatusCode::OK, Json(serde_json::json!({"status": "ok"})));
    }

    let meta_start = Instant::now();
    let meta_ok = state.metadata.list_buckets().await.is_ok();
    let meta_latency = meta_start.elapsed().as_millis() as u64;

    let storage_start = Instant::now();
    let storage_ok = state.storage.health_check().await.is_ok();
    let storage_latency = storage_start.elapsed().as_millis() as u64;

    let all_ok = meta_ok && storage_ok;
    let http_status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let component = |ok: bool, latency: u64| {
        serde_json::json!({
            "status": if ok { "ok" } else { "error" },
            "latency_ms": latency,
        })
    };

    let body = serde_json::json!({
        "status": if all_ok { "ok" } else { "degraded" },
        "checks": {
            "metadata": component(meta_ok, meta_latency),
            "storage": component(storage_ok, storage_latency),
        }
    });

    (http_status, Json(body))
}

/// `GET /healthz` -- liveness probe: the process answers.
async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// `GET /readyz` -- readiness probe: metadata and storage both answer.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let meta_ok = state.metadata.list_buckets().await.is_ok();
    let storage_ok = state.storage.health_check().await.is_ok();

    if meta_ok && storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse a raw query string into a decoded key/value map. Parameters
/// without a value (`?acl`, `?uploads`, `?delete`) map to an empty string.
pub(crate) fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&') {
            if part.is_empty() {
                continue;
            }
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            map.insert(
                crate::auth::sigv4::percent_decode(k),
                crate::auth::sigv4::percent_decode(v),
            );
        }
    }
    map
}

/// Reject keys whose decoded form exceeds the S3 limit before dispatch.
fn check_key_length(key: &str) -> Result<(), S3Error> {
    if key.len() > crate::types::MAX_KEY_LENGTH {
        return Err(S3Error::KeyTooLong);
    }
    Ok(())
}

// -- Service-level dispatch --------------------------------------------------

/// `GET /` -- ListBuckets
async fn handle_get_service(State(state): State<Arc<AppState>>) -> Result<Response, S3Error> {
    bucket::list_buckets(state).await
}

// -- Bucket-level dispatch ---------------------------------------------------

/// `GET /:bucket` -- dispatches based on query params:
/// - `?uploads` -> ListMultipartUploads
/// - `?acl` -> GetBucketAcl
/// - `?location` -> GetBucketLocation
/// - `?list-type=2` -> ListObjectsV2
/// - default -> ListObjectsV1
async fn handle_get_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("uploads") {
        multipart::list_multipart_uploads(state, &bucket_name, &query).await
    } else if query.contains_key("acl") {
        bucket::get_bucket_acl(state, &bucket_name).await
    } else if query.contains_key("location") {
        bucket::get_bucket_location(state, &bucket_name).await
    } else if query.get("list-type").is_some_and(|v| v == "2") {
        bucket::list_objects_v2(state, &bucket_name, &query).await
    } else {
        bucket::list_objects_v1(state, &bucket_name, &query).await
    }
}

/// `PUT /:bucket` -- dispatches based on query params:
/// - `?acl` -> PutBucketAcl
/// - default -> CreateBucket
async fn handle_put_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    RawQuery(raw_query): RawQuery,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("acl") {
        bucket::put_bucket_acl(state, &bucket_name, &headers, &body).await
    } else {
        let identity = identity.map(|Extension(id)| id);
        bucket::create_bucket(state, &bucket_name, identity.as_ref(), &headers, &body).await
    }
}

/// `DELETE /:bucket` -- DeleteBucket
async fn handle_delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
) -> Result<Response, S3Error> {
    bucket::delete_bucket(state, &bucket_name).await
}

/// `HEAD /:bucket` -- HeadBucket
async fn handle_head_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
) -> Result<Response, S3Error> {
    bucket::head_bucket(state, &bucket_name).await
}

/// `POST /:bucket` -- `?delete` -> DeleteObjects; anything else is 405.
async fn handle_post_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket_name): Path<String>,
    RawQuery(raw_query): RawQuery,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    let query = parse_query(raw_query);

    if query.contains_key("delete") {
        object::delete_objects(state, &bucket_name, &body).await
    } else {
        Err(S3Error::MethodNotAllowed)
    }
}

// -- Object-level dispatch ---------------------------------------------------

/// `GET /:bucket/*key` -- dispatches based on query params:
/// - `?acl` -> GetObjectAcl
/// - `?uploadId=...` -> ListParts
/// - default -> GetObject
async fn handle_get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    check_key_length(&key)?;
    let query = parse_query(raw_query);

    if query.contains_key("acl") {
        object::get_object_acl(state, &bucket_name, &key).await
    } else if query.contains_key("uploadId") {
        multipart::list_parts(state, &bucket_name, &key, &query).await
    } else {
        object::get_object(state, &bucket_name, &key, &headers, &query).await
    }
}

/// `PUT /:bucket/*key` -- dispatches based on query params and headers:
/// - `?acl` -> PutObjectAcl
/// - `?partNumber=...&uploadId=...` -> UploadPart (or UploadPartCopy with
///   `x-amz-copy-source`)
/// - `x-amz-copy-source` header -> CopyObject
/// - default -> PutObject
async fn handle_put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    check_key_length(&key)?;
    let query = parse_query(raw_query);
    let identity = identity.map(|Extension(id)| id);

    if query.contains_key("acl") {
        let bytes = axum::body::to_bytes(body, state.config.max_object_size as usize)
            .await
            .map_err(|e| S3Error::InternalError(format!("body read failed: {e}")))?;
        object::put_object_acl(state, &bucket_name, &key, &headers, &bytes).await
    } else if query.contains_key("partNumber") && query.contains_key("uploadId") {
        if headers.contains_key("x-amz-copy-source") {
            multipart::upload_part_copy(state, &bucket_name, &key, &query, &headers).await
        } else {
            multipart::upload_part(state, &bucket_name, &key, &query, &headers, body).await
        }
    } else if headers.contains_key("x-amz-copy-source") {
        object::copy_object(state, &bucket_name, &key, identity.as_ref(), &headers).await
    } else {
        object::put_object(state, &bucket_name, &key, identity.as_ref(), &headers, body).await
    }
}

/// `DELETE /:bucket/*key` -- `?uploadId=...` -> AbortMultipartUpload;
/// default -> DeleteObject.
async fn handle_delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    check_key_length(&key)?;
    let query = parse_query(raw_query);

    if query.contains_key("uploadId") {
        multipart::abort_multipart_upload(state, &bucket_name, &key, &query).await
    } else {
        object::delete_object(state, &bucket_name, &key).await
    }
}

/// `HEAD /:bucket/*key` -- HeadObject
async fn handle_head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, S3Error> {
    check_key_length(&key)?;
    object::head_object(state, &bucket_name, &key, &headers).await
}

/// `POST /:bucket/*key` -- `?uploads` -> CreateMultipartUpload;
/// `?uploadId=...` -> CompleteMultipartUpload; anything else is 405.
async fn handle_post_object(
    State(state): State<Arc<AppState>>,
    Path((bucket_name, key)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    check_key_length(&key)?;
    let query = parse_query(raw_query);

    if query.contains_key("uploads") {
        let identity = identity.map(|Extension(id)| id);
        multipart::create_multipart_upload(state, &bucket_name, &key, identity.as_ref(), &headers)
            .await
    } else if query.contains_key("uploadId") {
        multipart::complete_multipart_upload(state, &bucket_name, &key, &query, &body).await
    } else {
        Err(S3Error::MethodNotAllowed)
    }
}

// -- Tests --------------------------------------------------------------------
