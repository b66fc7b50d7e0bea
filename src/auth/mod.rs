//! AWS Signature Version 4 (SigV4) verification middleware
//!
//! Every S3 request must carry either a valid
//! `Authorization: AWS4-HMAC-SHA256 ...` header or presigned-URL query
//! parameters. The middleware reconstructs the canonical request from the
//! incoming HTTP request, derives (or fetches from cache) the signing key
//! for the looked-up credential, and compares the computed signature
//! against the one the client presented, in constant time.
//!
//! On success the verified owner identity is attached to the request
//! extensions for handlers to consume.

pub mod cache;
pub mod sigv4;

pub use cache::AuthCache;

use crate::api::S3Error;
use crate::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use sigv4::ParsedAuthorization;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Paths that bypass authentication.
const AUTH_SKIP_PATHS: &[&str] = &[
    "/health",
    "/healthz",
    "/readyz",
    "/metrics",
    "/docs",
    "/openapi",
    "/openapi.json",
];

/// Bounds on `X-Amz-Expires` (1 second to 7 days).
const MIN_PRESIGNED_EXPIRES: i64 = 1;
const MAX_PRESIGNED_EXPIRES: i64 = 604_800;

/// Verified caller identity, attached to request extensions on success.
#[derive(Debug, Clone)]
pub struct Identity {
    pub owner_id: String,
    pub display_name: String,
}

/// SigV4 material extracted from a presigned URL's query parameters.
#[derive(Debug, Clone)]
struct PresignedParams {
    auth: ParsedAuthorization,
    /// Raw `X-Amz-Date` value, reused verbatim in the string to sign.
    amz_date: String,
    expires: i64,
}

/// How the request authenticates itself.
enum AuthKind {
    Header(ParsedAuthorization),
    Presigned(PresignedParams),
}

/// Check whether the query string carries presigned parameters.
/// Key-level parse: a value containing `X-Amz-Algorithm=` must not match.
fn has_presigned_query(query: &str) -> bool {
    query.split('&').filter(|s| !s.is_empty()).any(|pair| {
        let key = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
        sigv4::percent_decode(key) == "X-Amz-Algorithm"
    })
}

/// Fetch one decoded query parameter by decoded key.
fn query_param(query: &str, wanted: &str) -> Option<String> {
    query.split('&').filter(|s| !s.is_empty()).find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if sigv4::percent_decode(k) == wanted {
            Some(sigv4::percent_decode(v))
        } else {
            None
        }
    })
}

/// Parse presigned query parameters, validating presence and the expiry bound.
fn parse_presigned(query: &str) -> Result<PresignedParams, S3Error> {
    let algorithm = query_param(query, "X-Amz-Algorithm").unwrap_or_default();
    if algorithm != sigv4::ALGORITHM {
        return Err(S3Error::InvalidArgument(format!(
            "Unsupported signing algorithm: {algorithm}"
        )));
    }

    let credential = query_param(query, "X-Amz-Credential");
    let amz_date = query_param(query, "X-Amz-Date");
    let expires = query_param(query, "X-Amz-Expires");
    let signed_headers = query_param(query, "X-Amz-SignedHeaders");
    let signature = query_param(query, "X-Amz-Signature");

    let (credential, amz_date, expires, signed_headers, signature) =
        match (credential, amz_date, expires, signed_headers, signature) {
            (Some(c), Some(d), Some(e), Some(h), Some(s)) => (c, d, e, h, s),
            _ => {
                return Err(S3Error::AccessDenied(
                    "Missing required presigned URL parameters".to_string(),
                ))
            }
        };

    let expires: i64 = expires.parse().map_err(|_| {
        S3Error::InvalidArgument(format!("Invalid X-Amz-Expires: {expires}"))
    })?;
    if !(MIN_PRESIGNED_EXPIRES..=MAX_PRESIGNED_EXPIRES).contains(&expires) {
        return Err(S3Error::InvalidArgument(format!(
            "X-Amz-Expires must be between {MIN_PRESIGNED_EXPIRES} and {MAX_PRESIGNED_EXPIRES} seconds"
        )));
    }

    // Reuse the header parser by rebuilding the corrected Authorization form.
    let rebuilt = format!(
        "{} Credential={credential}, SignedHeaders={signed_headers}, Signature={signature}",
        sigv4::ALGORITHM
    );
    let auth = sigv4::parse_authorization_header(&rebuilt).ok_or_else(|| {
        S3Error::AccessDenied("Invalid X-Amz-Credential format".to_string())
    })?;

    Ok(PresignedParams {
        auth,
        amz_date,
        expires,
    })
}

/// Determine how (and whether) the request authenticates.
fn detect_auth(
    auth_header: Option<&str>,
    query: &str,
) -> Result<Option<AuthKind>, S3Error> {
    let has_header = auth_header.is_some_and(|h| h.trim_start().starts_with(sigv4::ALGORITHM));
    let has_query = has_presigned_query(query);

    match (has_header, has_query) {
        (true, true) => Err(S3Error::InvalidArgument(
            "Request carries both an Authorization header and presigned query parameters"
                .to_string(),
        )),
        (true, false) => {
            let parsed = sigv4::parse_authorization_header(auth_header.unwrap_or_default())
                .ok_or_else(|| {
                    S3Error::AccessDenied("Invalid Authorization header format".to_string())
                })?;
            Ok(Some(AuthKind::Header(parsed)))
        }
        (false, true) => Ok(Some(AuthKind::Presigned(parse_presigned(query)?))),
        (false, false) => Ok(None),
    }
}

/// Fetch the signing credential, consulting the cache first. Failed lookups
/// are never cached.
async fn lookup_credential(
    state: &AppState,
    access_key_id: &str,
) -> Result<crate::types::Credential, S3Error> {
    if let Some(cached) = state.auth_cache.get_credential(access_key_id) {
        return Ok(cached);
    }
    let credential = state
        .metadata
        .get_credential(access_key_id)
        .await
        .map_err(|e| S3Error::InternalError(e.to_string()))?;
    match credential {
        Some(c) => {
            state.auth_cache.put_credential(access_key_id, c.clone());
            Ok(c)
        }
        None => {
            debug!("Unknown or inactive access key: {access_key_id}");
            Err(S3Error::InvalidAccessKeyId)
        }
    }
}

/// Derive the signing key, consulting the cache first.
fn signing_key_for(
    state: &AppState,
    secret: &str,
    parsed: &ParsedAuthorization,
) -> Zeroizing<[u8; 32]> {
    if let Some(cached) = state.auth_cache.get_signing_key(
        secret,
        &parsed.date_stamp,
        &parsed.region,
        &parsed.service,
    ) {
        return cached;
    }
    let derived =
        sigv4::derive_signing_key(secret, &parsed.date_stamp, &parsed.region, &parsed.service);
    state.auth_cache.put_signing_key(
        secret,
        &parsed.date_stamp,
        &parsed.region,
        &parsed.service,
        derived.clone(),
    );
    derived
}

/// Resolve the host value the client signed: the Host header for HTTP/1.1,
/// or the URI authority for HTTP/2 (hyper strips the pseudo-header).
fn request_host(req: &Request<Body>) -> String {
    req.headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Axum middleware enforcing SigV4 on every non-exempt route.
#[axum::debug_middleware]
pub async fn sigv4_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, S3Error> {
    let path = req.uri().path().to_string();
    if AUTH_SKIP_PATHS.contains(&path.as_str()) || path.starts_with("/docs/") {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let query_string = req.uri().query().unwrap_or("").to_string();

    let kind = detect_auth(auth_header.as_deref(), &query_string)?.ok_or_else(|| {
        S3Error::AccessDenied("No authentication information provided".to_string())
    })?;

    let identity = match kind {
        AuthKind::Header(parsed) => {
            verify_header_auth(&state, &mut req, &parsed, &query_string).await?
        }
        AuthKind::Presigned(params) => {
            verify_presigned_auth(&state, &req, &params, &query_string).await?
        }
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

async fn verify_header_auth(
    state: &AppState,
    req: &mut Request<Body>,
    parsed: &ParsedAuthorization,
    query_string: &str,
) -> Result<Identity, S3Error> {
    // Timestamp: x-amz-date preferred, Date as fallback.
    let amz_date = req
        .headers()
        .get("x-amz-date")
        .or_else(|| req.headers().get("date"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| S3Error::AccessDenied("Missing request timestamp".to_string()))?;

    let timestamp = sigv4::parse_timestamp(&amz_date)
        .ok_or_else(|| S3Error::AccessDenied(format!("Unparseable timestamp: {amz_date}")))?;

    let tolerance = state.config.clock_skew_tolerance_secs;
    if !sigv4::within_clock_skew(timestamp, Utc::now(), tolerance) {
        warn!(
            "Clock skew too large for access key {}: {}",
            parsed.access_key_id, amz_date
        );
        return Err(S3Error::RequestTimeTooSkewed);
    }

    // Credential-scope date must match the timestamp's date.
    if parsed.date_stamp != timestamp.format("%Y%m%d").to_string() {
        debug!(
            "Credential scope date {} does not match timestamp {}",
            parsed.date_stamp, amz_date
        );
        return Err(S3Error::SignatureDoesNotMatch);
    }

    let credential = lookup_credential(state, &parsed.access_key_id).await?;

    // Payload hash: trust x-amz-content-sha256 when present; otherwise the
    // client hashed the body itself, so capture it, hash it, and hand the
    // bytes back to the downstream handler.
    let payload_hash = match req
        .headers()
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => value.to_string(),
        None => {
            let (parts, body) = std::mem::take(req).into_parts();
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .map_err(|e| S3Error::InternalError(format!("body read failed: {e}")))?;
            let hash = sigv4::sha256_hex(&bytes);
            *req = Request::from_parts(parts, Body::from(bytes));
            hash
        }
    };

    let host = request_host(req);
    let canonical_query = sigv4::canonical_query_string(query_string, &[]);
    let creq = sigv4::canonical_request(
        req.method().as_str(),
        req.uri().path(),
        &canonical_query,
        req.headers(),
        &host,
        &parsed.signed_headers,
        &payload_hash,
    );
    let sts = sigv4::string_to_sign(&amz_date, &parsed.credential_scope, &creq);

    let signing_key = signing_key_for(state, &credential.secret_key, parsed);
    let computed = sigv4::compute_signature(&*signing_key, &sts);

    if !sigv4::signatures_match(&computed, &parsed.signature) {
        debug!(
            "Signature mismatch for access key {}",
            parsed.access_key_id
        );
        return Err(S3Error::SignatureDoesNotMatch);
    }

    debug!("Auth OK for access key {}", parsed.access_key_id);
    Ok(Identity {
        owner_id: credential.owner_id,
        display_name: credential.display_name,
    })
}

async fn verify_presigned_auth(
    state: &AppState,
    req: &Request<Body>,
    params: &PresignedParams,
    query_string: &str,
) -> Result<Identity, S3Error> {
    let signed_at = sigv4::parse_timestamp(&params.amz_date).ok_or_else(|| {
        S3Error::InvalidArgument(format!("Invalid X-Amz-Date: {}", params.amz_date))
    })?;

    if !sigv4::presigned_still_valid(signed_at, params.expires, Utc::now()) {
        debug!("Presigned URL expired (signed at {signed_at}, expires {})", params.expires);
        return Err(S3Error::AccessDenied("Request has expired".to_string()));
    }

    let host = request_host(req);
    let canonical_query = sigv4::canonical_query_string(query_string, &["X-Amz-Signature"]);
    let creq = sigv4::canonical_request(
        req.method().as_str(),
        req.uri().path(),
        &canonical_query,
        req.headers(),
        &host,
        &params.auth.signed_headers,
        sigv4::UNSIGNED_PAYLOAD,
    );
    let sts = sigv4::string_to_sign(&params.amz_date, &params.auth.credential_scope, &creq);

    let credential = lookup_credential(state, &params.auth.access_key_id).await?;

    let signing_key = signing_key_for(state, &credential.secret_key, &params.auth);
    let computed = sigv4::compute_signature(&*signing_key, &sts);

    if !sigv4::signatures_match(&computed, &params.auth.signature) {
        debug!(
            "Presigned signature mismatch for access key {}",
            params.auth.access_key_id
        );
        return Err(S3Error::SignatureDoesNotMatch);
    }

    debug!("Presigned auth OK for access key {}", params.auth.access_key_id);
    Ok(Identity {
        owner_id: credential.owner_id,
        display_name: credential.display_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_presigned_query() {
        assert!(has_presigned_query(
            "X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential=foo"
        ));
        assert!(!has_presigned_query("list-type=2&prefix=test"));
        assert!(!has_presigned_query(""));
        // Must not match a value containing "X-Amz-Algorithm=".
        assert!(!has_presigned_query("foo=X-Amz-Algorithm%3Dbar"));
    }

    #[test]
    fn test_detect_auth_ambiguous() {
        let err = detect_auth(
            Some("AWS4-HMAC-SHA256 Credential=a/b/c/d/aws4_request, SignedHeaders=host, Signature=x"),
            "X-Amz-Algorithm=AWS4-HMAC-SHA256",
        )
        .unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn test_detect_auth_anonymous() {
        assert!(detect_auth(None, "").unwrap().is_none());
        // A non-SigV4 Authorization header counts as anonymous.
        assert!(detect_auth(Some("Basic dXNlcg=="), "").unwrap().is_none());
    }

    #[test]
    fn test_detect_auth_malformed_header() {
        let err = detect_auth(Some("AWS4-HMAC-SHA256 garbage"), "").unwrap_err();
        assert_eq!(err.code(), "AccessDenied");
    }

    fn presigned_query(expires: &str) -> String {
        format!(
            "X-Amz-Algorithm=AWS4-HMAC-SHA256\
             &X-Amz-Credential=AK%2F20260101%2Fus-east-1%2Fs3%2Faws4_request\
             &X-Amz-Date=20260101T000000Z&X-Amz-Expires={expires}\
             &X-Amz-SignedHeaders=host&X-Amz-Signature=abc"
        )
    }

    #[test]
    fn test_parse_presigned_ok() {
        let params = parse_presigned(&presigned_query("3600")).unwrap();
        assert_eq!(params.auth.access_key_id, "AK");
        assert_eq!(params.auth.region, "us-east-1");
        assert_eq!(params.expires, 3600);
        assert_eq!(params.amz_date, "20260101T000000Z");
    }

    #[test]
    fn test_parse_presigned_expiry_bounds() {
        assert!(parse_presigned(&presigned_query("0")).is_err());
        assert!(parse_presigned(&presigned_query("604801")).is_err());
        assert!(parse_presigned(&presigned_query("1")).is_ok());
        assert!(parse_presigned(&presigned_query("604800")).is_ok());
        assert!(parse_presigned(&presigned_query("not-a-number")).is_err());
    }

    #[test]
    fn test_parse_presigned_missing_params() {
        let err =
            parse_presigned("X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Signature=abc").unwrap_err();
        assert_eq!(err.code(), "AccessDenied");
    }

    #[test]
    fn test_parse_presigned_wrong_algorithm() {
        let err = parse_presigned("X-Amz-Algorithm=AWS4-HMAC-SHA1").unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }
}

