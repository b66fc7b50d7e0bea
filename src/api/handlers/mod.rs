//! S3 API request handlers
//!
//! Split into submodules by domain:
//! - `bucket` -- bucket CRUD, ACLs, location, and object listings
//! - `object` -- GET, HEAD, PUT, COPY, DELETE for individual objects
//! - `multipart` -- multipart upload lifecycle

pub mod bucket;
pub mod multipart;
pub mod object;

use crate::acl::AccessControlPolicy;
use crate::api::aws_chunked::{self, ChunkDecoder};
use crate::api::S3Error;
use crate::auth::Identity;
use crate::storage::BodyReader;
use crate::types::{AMZ_META_PREFIX, MAX_KEY_LENGTH};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tokio_util::io::StreamReader;

/// Adapt a streaming request body into the storage backend's reader,
/// stripping aws-chunked framing when the client signed with
/// `STREAMING-AWS4-HMAC-SHA256-PAYLOAD`.
fn body_reader(body: Body, headers: &HeaderMap) -> BodyReader {
    let stream = body.into_data_stream().map_err(std::io::Error::other);
    if aws_chunked::is_aws_chunked(headers) {
        let mut decoder = ChunkDecoder::new();
        let decoded = stream.map(move |frame| {
            let frame = frame?;
            let mut out = Vec::with_capacity(frame.len());
            decoder
                .feed(&frame, &mut out)
                .map_err(std::io::Error::other)?;
            Ok::<Bytes, std::io::Error>(Bytes::from(out))
        });
        Box::new(StreamReader::new(decoded))
    } else {
        Box::new(StreamReader::new(stream))
    }
}

/// Build an XML response with correct Content-Type header.
fn xml_response(xml: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [("Content-Type", "application/xml")],
        xml.into(),
    )
        .into_response()
}

fn hval(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Last-Modified / Date response format (RFC 7231).
fn http_date(ts: &DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Extract Content-Type header, defaulting to application/octet-stream.
fn extract_content_type(headers: &HeaderMap) -> String {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// The optional content-shaping headers stored alongside an object.
#[derive(Debug, Clone, Default)]
struct ContentHeaders {
    content_encoding: Option<String>,
    content_language: Option<String>,
    content_disposition: Option<String>,
    cache_control: Option<String>,
    expires: Option<String>,
}

fn extract_content_headers(headers: &HeaderMap) -> ContentHeaders {
    ContentHeaders {
        content_encoding: header_string(headers, "content-encoding"),
        content_language: header_string(headers, "content-language"),
        content_disposition: header_string(headers, "content-disposition"),
        cache_control: header_string(headers, "cache-control"),
        expires: header_string(headers, "expires"),
    }
}

/// Extract user-provided `x-amz-meta-*` headers, keys lowercased with the
/// prefix stripped.
fn extract_user_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_ascii_lowercase();
            let suffix = name.strip_prefix(AMZ_META_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((suffix.to_string(), value.to_string()))
        })
        .collect()
}

/// Requested storage class, defaulting to STANDARD.
fn extract_storage_class(headers: &HeaderMap) -> String {
    header_string(headers, "x-amz-storage-class").unwrap_or_else(|| "STANDARD".to_string())
}

/// Parse the `Content-MD5` header into raw digest bytes.
/// Malformed base64 (or a digest of the wrong width) is `InvalidDigest`.
fn extract_content_md5(headers: &HeaderMap) -> Result<Option<[u8; 16]>, S3Error> {
    use base64::Engine;
    let Some(value) = header_string(headers, "content-md5") else {
        return Ok(None);
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|_| S3Error::InvalidDigest)?;
    let digest: [u8; 16] = decoded.try_into().map_err(|_| S3Error::InvalidDigest)?;
    Ok(Some(digest))
}

/// Validate a decoded object key: bounded length and no filesystem hazards.
fn validate_object_key(key: &str) -> Result<(), S3Error> {
    if key.is_empty() {
        return Err(S3Error::InvalidArgument(
            "Object key must not be empty".to_string(),
        ));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(S3Error::KeyTooLong);
    }
    if key.contains('\0') || key.contains('\\') {
        return Err(S3Error::InvalidArgument(
            "Object key contains forbidden characters".to_string(),
        ));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(S3Error::InvalidArgument(
            "Object key must not contain '..' path segments".to_string(),
        ));
    }
    Ok(())
}

/// The identity a mutation is attributed to: the verified caller when
/// present, the configured single-tenant owner otherwise.
fn effective_owner(state: &crate::AppState, identity: Option<&Identity>) -> (String, String) {
    match identity {
        Some(id) => (id.owner_id.clone(), id.display_name.clone()),
        None => (
            state.config.owner.access_key_id.clone(),
            state.config.owner.display_name.clone(),
        ),
    }
}

/// Resolve the ACL for a new resource: canned `x-amz-acl` header first, then
/// explicit `x-amz-grant-*` headers, then owner FULL_CONTROL. Returns the
/// JSON blob stored on the row.
fn acl_from_headers(
    headers: &HeaderMap,
    owner_id: &str,
    owner_display: &str,
) -> Result<String, S3Error> {
    if let Some(canned) = header_string(headers, "x-amz-acl") {
        let policy = AccessControlPolicy::from_canned(&canned, owner_id, owner_display)
            .map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
        return Ok(policy.to_json());
    }

    let grant_headers: Vec<(&str, &str)> = [
        "x-amz-grant-read",
        "x-amz-grant-write",
        "x-amz-grant-read-acp",
        "x-amz-grant-write-acp",
        "x-amz-grant-full-control",
    ]
    .iter()
    .filter_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|v| (*name, v))
    })
    .collect();

    if !grant_headers.is_empty() {
        let policy =
            AccessControlPolicy::from_grant_headers(&grant_headers, owner_id, owner_display)
                .map_err(|e| S3Error::InvalidArgument(e.to_string()))?;
        return Ok(policy.to_json());
    }

    Ok(AccessControlPolicy::full_control(owner_id, owner_display).to_json())
}

/// Resolve a new ACL from a PutBucketAcl/PutObjectAcl request: an XML body
/// when present, headers otherwise.
fn acl_from_request(
    headers: &HeaderMap,
    body: &[u8],
    owner_id: &str,
    owner_display: &str,
) -> Result<String, S3Error> {
    if !body.is_empty() {
        let policy = AccessControlPolicy::from_xml(body).map_err(|_| S3Error::MalformedXML)?;
        return Ok(policy.to_json());
    }
    acl_from_headers(headers, owner_id, owner_display)
}

/// Parse `x-amz-copy-source` into `(bucket, key)`. The value is URL-encoded
/// and may carry a leading slash.
fn parse_copy_source(headers: &HeaderMap) -> Result<(String, String), S3Error> {
    let raw = header_string(headers, "x-amz-copy-source").ok_or_else(|| {
        S3Error::InvalidArgument("Missing x-amz-copy-source header".to_string())
    })?;
    let decoded = urlencoding::decode(&raw)
        .map_err(|_| S3Error::InvalidArgument("Invalid copy source encoding".to_string()))?;
    let trimmed = decoded.trim_start_matches('/');
    let (bucket, key) = trimmed.split_once('/').ok_or_else(|| {
        S3Error::InvalidArgument("Copy source must be bucket/key".to_string())
    })?;
    if key.is_empty() {
        return Err(S3Error::InvalidArgument(
            "Copy source must be bucket/key".to_string(),
        ));
    }
    Ok((bucket.to_string(), key.to_string()))
}
