//! Object-level S3 handlers: GET, HEAD, PUT, COPY, DELETE, batch delete,
//! and object ACLs.

use super::{
    acl_from_request, body_reader, effective_owner, extract_content_headers, extract_content_md5,
    extract_content_type, extract_storage_class, extract_user_metadata, http_date, hval,
    parse_copy_source, validate_object_key, xml_response, S3Error,
};
use crate::acl::AccessControlPolicy;
use crate::api::aws_chunked::{self, ChunkDecoder};
use crate::api::conditional::{evaluate_preconditions, parse_range, Precondition};
use crate::api::xml::{CopyObjectResult, DeleteRequest, DeleteResult};
use crate::auth::Identity;
use crate::types::{quote_etag, ObjectRecord};
use crate::AppState;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// MD5 of the empty byte string, the ETag of directory markers.
const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Maximum keys accepted by one DeleteObjects request.
const MAX_BATCH_DELETE: usize = 1000;

/// `PUT /{bucket}/{key}` -- PutObject
#[instrument(skip(state, identity, headers, body))]
pub async fn put_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    identity: Option<&Identity>,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    validate_object_key(key)?;
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }

    // Mutating conditionals: a matching If-None-Match (or failed If-Match)
    // blocks the overwrite with 412.
    if let Some(existing) = state.metadata.get_object(bucket, key).await? {
        match evaluate_preconditions(&existing.etag, existing.last_modified, headers, false) {
            Precondition::Proceed => {}
            _ => return Err(S3Error::PreconditionFailed),
        }
    } else if headers.contains_key("if-match") {
        return Err(S3Error::PreconditionFailed);
    }

    let expected_md5 = extract_content_md5(headers)?;
    let (owner_id, owner_display) = effective_owner(&state, identity);
    let acl = super::acl_from_headers(headers, &owner_id, &owner_display)?;
    let content = extract_content_headers(headers);

    // S3 directory marker: zero-byte object with trailing slash (e.g.
    // "folder/"), created by consoles and GUI clients. There is no file to
    // write; the metadata row alone represents it.
    let (size, etag) = if key.ends_with('/') {
        let bytes = axum::body::to_bytes(body, state.config.max_object_size as usize)
            .await
            .map_err(|e| S3Error::InternalError(format!("body read failed: {e}")))?;
        let payload = if aws_chunked::is_aws_chunked(headers) {
            ChunkDecoder::decode_all(&bytes)
                .map_err(|e| S3Error::InvalidArgument(e.to_string()))?
        } else {
            bytes.to_vec()
        };
        if !payload.is_empty() {
            return Err(S3Error::InvalidArgument(
                "Directory marker keys cannot carry content".to_string(),
            ));
        }
        info!("Creating directory marker {}/{}", bucket, key);
        (0, quote_etag(EMPTY_MD5))
    } else {
        let blob = state
            .storage
            .put_object(bucket, key, body_reader(body, headers), expected_md5)
            .await?;
        (blob.size, quote_etag(&blob.md5_hex))
    };

    let record = ObjectRecord {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size,
        etag: etag.clone(),
        content_type: if key.ends_with('/') {
            "application/x-directory".to_string()
        } else {
            extract_content_type(headers)
        },
        content_encoding: content.content_encoding,
        content_language: content.content_language,
        content_disposition: content.content_disposition,
        cache_control: content.cache_control,
        expires: content.expires,
        storage_class: extract_storage_class(headers),
        acl,
        user_metadata: extract_user_metadata(headers),
        last_modified: Utc::now(),
    };

    state.metadata.put_object(record).await?;
    info!("PUT {}/{} ({} bytes)", bucket, key, size);

    let mut response = StatusCode::OK.into_response();
    response.headers_mut().insert(header::ETAG, hval(&etag));
    Ok(response)
}

/// Build the response headers an object carries on GET/HEAD, applying any
/// `response-*` query overrides.
fn object_headers(record: &ObjectRecord, query: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, hval(&record.etag));
    headers.insert(
        header::LAST_MODIFIED,
        hval(&http_date(&record.last_modified)),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let content_type = query
        .get("response-content-type")
        .cloned()
        .unwrap_or_else(|| record.content_type.clone());
    headers.insert(header::CONTENT_TYPE, hval(&content_type));

    let overridable = [
        (
            header::CONTENT_ENCODING,
            "response-content-encoding",
            &record.content_encoding,
        ),
        (
            header::CONTENT_LANGUAGE,
            "response-content-language",
            &record.content_language,
        ),
        (
            header::CONTENT_DISPOSITION,
            "response-content-disposition",
            &record.content_disposition,
        ),
        (
            header::CACHE_CONTROL,
            "response-cache-control",
            &record.cache_control,
        ),
        (header::EXPIRES, "response-expires", &record.expires),
    ];
    for (name, override_param, stored) in overridable {
        let value = query.get(override_param).cloned().or_else(|| stored.clone());
        if let Some(v) = value {
            headers.insert(name, hval(&v));
        }
    }

    if record.storage_class != "STANDARD" {
        headers.insert("x-amz-storage-class", hval(&record.storage_class));
    }

    for (key, value) in &record.user_metadata {
        let name = format!("x-amz-meta-{key}");
        if let Ok(name) = header::HeaderName::from_bytes(name.as_bytes()) {
            headers.insert(name, hval(value));
        }
    }

    headers
}

/// Shared GET/HEAD logic: resolve the record, evaluate conditionals and
/// Range, and produce `(status, headers, byte span)`.
async fn prepare_object_read(
    state: &AppState,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<(StatusCode, HeaderMap, ObjectRecord, Option<(u64, u64)>), S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }
    let record = state
        .metadata
        .get_object(bucket, key)
        .await?
        .ok_or_else(|| S3Error::NoSuchKey(key.to_string()))?;

    match evaluate_preconditions(&record.etag, record.last_modified, headers, true) {
        Precondition::Proceed => {}
        Precondition::NotModified => {
            return Err(S3Error::NotModified {
                etag: record.etag.clone(),
                last_modified: http_date(&record.last_modified),
            })
        }
        Precondition::Failed => return Err(S3Error::PreconditionFailed),
    }

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => Some(parse_range(value, record.size).map_err(|_| {
            S3Error::InvalidRange {
                total_size: record.size,
            }
        })?),
        None => None,
    };

    let mut response_headers = object_headers(&record, query);
    let status = match range {
        Some((start, end)) => {
            response_headers.insert(
                header::CONTENT_RANGE,
                hval(&format!("bytes {start}-{end}/{}", record.size)),
            );
            response_headers.insert(
                header::CONTENT_LENGTH,
                hval(itoa::Buffer::new().format(end - start + 1)),
            );
            StatusCode::PARTIAL_CONTENT
        }
        None => {
            response_headers.insert(
                header::CONTENT_LENGTH,
                hval(itoa::Buffer::new().format(record.size)),
            );
            StatusCode::OK
        }
    };

    Ok((status, response_headers, record, range))
}

/// `GET /{bucket}/{key}` -- GetObject
///
/// Bodies stream from the backend; zero-byte objects (including directory
/// markers, which have no backing file) short-circuit to an empty body.
#[instrument(skip(state, headers, query))]
pub async fn get_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let (status, response_headers, record, range) =
        prepare_object_read(&state, bucket, key, headers, query).await?;

    let body = if record.size == 0 {
        Body::empty()
    } else {
        let stream = state.storage.get_object(bucket, key, range).await?;
        Body::from_stream(stream)
    };

    let mut response = (status, body).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

/// `HEAD /{bucket}/{key}` -- HeadObject
#[instrument(skip(state, headers))]
pub async fn head_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let query = HashMap::new();
    let (status, response_headers, _record, _range) =
        prepare_object_read(&state, bucket, key, headers, &query).await?;
    let mut response = status.into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

/// `PUT /{bucket}/{key}` with `x-amz-copy-source` -- CopyObject
#[instrument(skip(state, identity, headers))]
pub async fn copy_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    identity: Option<&Identity>,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    validate_object_key(key)?;
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }

    let (src_bucket, src_key) = parse_copy_source(headers)?;
    if !state.metadata.bucket_exists(&src_bucket).await? {
        return Err(S3Error::NoSuchBucket(src_bucket));
    }
    let source = state
        .metadata
        .get_object(&src_bucket, &src_key)
        .await?
        .ok_or_else(|| S3Error::NoSuchKey(src_key.clone()))?;

    // x-amz-copy-source-if-* conditionals evaluate against the source.
    let mut source_conditions = HeaderMap::new();
    for (from, to) in [
        ("x-amz-copy-source-if-match", "if-match"),
        ("x-amz-copy-source-if-none-match", "if-none-match"),
        ("x-amz-copy-source-if-modified-since", "if-modified-since"),
        (
            "x-amz-copy-source-if-unmodified-since",
            "if-unmodified-since",
        ),
    ] {
        if let Some(value) = headers.get(from) {
            source_conditions.insert(to, value.clone());
        }
    }
    if !source_conditions.is_empty() {
        match evaluate_preconditions(
            &source.etag,
            source.last_modified,
            &source_conditions,
            false,
        ) {
            Precondition::Proceed => {}
            _ => return Err(S3Error::PreconditionFailed),
        }
    }

    let directive = headers
        .get("x-amz-metadata-directive")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("COPY");
    let replace = match directive {
        "COPY" => false,
        "REPLACE" => true,
        other => {
            return Err(S3Error::InvalidArgument(format!(
                "Invalid x-amz-metadata-directive: {other}"
            )))
        }
    };

    let blob = state
        .storage
        .copy_object(&src_bucket, &src_key, bucket, key)
        .await?;
    let etag = quote_etag(&blob.md5_hex);
    let now = Utc::now();

    let (owner_id, owner_display) = effective_owner(&state, identity);
    let content = extract_content_headers(headers);
    let record = ObjectRecord {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: blob.size,
        etag: etag.clone(),
        content_type: if replace {
            extract_content_type(headers)
        } else {
            source.content_type.clone()
        },
        content_encoding: if replace {
            content.content_encoding
        } else {
            source.content_encoding.clone()
        },
        content_language: if replace {
            content.content_language
        } else {
            source.content_language.clone()
        },
        content_disposition: if replace {
            content.content_disposition
        } else {
            source.content_disposition.clone()
        },
        cache_control: if replace {
            content.cache_control
        } else {
            source.cache_control.clone()
        },
        expires: if replace {
            content.expires
        } else {
            source.expires.clone()
        },
        storage_class: extract_storage_class(headers),
        acl: super::acl_from_headers(headers, &owner_id, &owner_display)?,
        user_metadata: if replace {
            extract_user_metadata(headers)
        } else {
            source.user_metadata.clone()
        },
        last_modified: now,
    };

    state.metadata.put_object(record).await?;
    info!(
        "COPY {}/{} -> {}/{} ({} bytes)",
        src_bucket, src_key, bucket, key, blob.size
    );

    let result = CopyObjectResult {
        etag,
        last_modified: now,
    };
    Ok(xml_response(result.to_xml()))
}

/// `DELETE /{bucket}/{key}` -- DeleteObject (idempotent 204)
#[instrument(skip(state))]
pub async fn delete_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }
    // Row first, then bytes: once the row is gone the object is externally
    // gone, and a leftover file is a harmless orphan.
    state.metadata.delete_object(bucket, key).await?;
    state.storage.delete_object(bucket, key).await;
    debug!("DELETE {}/{}", bucket, key);
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /{bucket}?delete` -- DeleteObjects (batch)
#[instrument(skip(state, body))]
pub async fn delete_objects(
    state: Arc<AppState>,
    bucket: &str,
    body: &[u8],
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }

    let request = DeleteRequest::from_xml(
        std::str::from_utf8(body).map_err(|_| S3Error::MalformedXML)?,
    )
    .map_err(|_| S3Error::MalformedXML)?;
    if request.objects.is_empty() || request.objects.len() > MAX_BATCH_DELETE {
        return Err(S3Error::MalformedXML);
    }
    let quiet = request.quiet.unwrap_or(false);

    let keys: Vec<String> = request.objects.into_iter().map(|o| o.key).collect();
    state.metadata.delete_objects(bucket, &keys).await?;
    for key in &keys {
        state.storage.delete_object(bucket, key).await;
    }

    info!("DeleteObjects {}: {} keys", bucket, keys.len());
    let result = DeleteResult {
        deleted: keys,
        errors: Vec::new(),
    };
    Ok(xml_response(result.to_xml(quiet)))
}

/// `GET /{bucket}/{key}?acl` -- GetObjectAcl
#[instrument(skip(state))]
pub async fn get_object_acl(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }
    let record = state
        .metadata
        .get_object(bucket, key)
        .await?
        .ok_or_else(|| S3Error::NoSuchKey(key.to_string()))?;
    let policy = AccessControlPolicy::from_json_or_default(
        &record.acl,
        &state.config.owner.access_key_id,
        &state.config.owner.display_name,
    );
    Ok(xml_response(policy.to_xml()))
}

/// `PUT /{bucket}/{key}?acl` -- PutObjectAcl
#[instrument(skip(state, headers, body))]
pub async fn put_object_acl(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }
    if state.metadata.get_object(bucket, key).await?.is_none() {
        return Err(S3Error::NoSuchKey(key.to_string()));
    }
    let acl = acl_from_request(
        headers,
        body,
        &state.config.owner.access_key_id,
        &state.config.owner.display_name,
    )?;
    state.metadata.update_object_acl(bucket, key, &acl).await?;
    Ok(StatusCode::OK.into_response())
}
