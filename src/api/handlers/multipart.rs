//! Multipart-upload S3 handlers: initiate, upload parts (including copy),
//! list, abort, and the atomic completion that materialises the object.

use super::{
    effective_owner, extract_content_headers, extract_content_md5, extract_content_type,
    extract_storage_class, extract_user_metadata, hval, parse_copy_source, validate_object_key,
    xml_response, S3Error,
};
use crate::api::conditional::parse_range;
use crate::api::xml::{
    parse_complete_multipart_upload, CompleteMultipartUploadResult, CopyObjectResult,
    InitiateMultipartUploadResult, ListMultipartUploadsResult, ListPartsResult,
};
use crate::auth::Identity;
use crate::types::{
    new_upload_id, quote_etag, unquote_etag, MultipartUploadRecord, ObjectRecord, PartRecord,
    MAX_LIST_KEYS, MIN_PART_SIZE,
};
use crate::AppState;
use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::{info, instrument};

/// Parts are numbered 1 through 10000.
const PART_NUMBER_RANGE: std::ops::RangeInclusive<u32> = 1..=10000;

fn query_required<'a>(
    query: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, S3Error> {
    query
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| S3Error::InvalidArgument(format!("Missing {name} parameter")))
}

fn parse_part_number(query: &HashMap<String, String>) -> Result<u32, S3Error> {
    let raw = query_required(query, "partNumber")?;
    let part_number: u32 = raw
        .parse()
        .map_err(|_| S3Error::InvalidArgument(format!("Invalid partNumber: {raw}")))?;
    if !PART_NUMBER_RANGE.contains(&part_number) {
        return Err(S3Error::InvalidArgument(format!(
            "Part number must be between 1 and 10000, got {part_number}"
        )));
    }
    Ok(part_number)
}

/// Fetch the upload row and verify it belongs to `(bucket, key)`.
async fn resolve_upload(
    state: &AppState,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<MultipartUploadRecord, S3Error> {
    let upload = state
        .metadata
        .get_multipart_upload(upload_id)
        .await?
        .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;
    if upload.bucket != bucket || upload.key != key {
        return Err(S3Error::NoSuchUpload(upload_id.to_string()));
    }
    Ok(upload)
}

/// Composite ETag for an assembled object:
/// `hex(md5(concat(raw_md5_of_each_part))) + "-" + part_count`, quoted.
fn composite_etag(part_etags: &[String]) -> Result<String, S3Error> {
    let mut concat = Vec::with_capacity(part_etags.len() * 16);
    for etag in part_etags {
        let raw = hex::decode(unquote_etag(etag))
            .map_err(|_| S3Error::InternalError(format!("Unparseable stored part ETag: {etag}")))?;
        if raw.len() != 16 {
            return Err(S3Error::InternalError(format!(
                "Stored part ETag is not an MD5: {etag}"
            )));
        }
        concat.extend_from_slice(&raw);
    }
    let digest = Md5::digest(&concat);
    Ok(quote_etag(&format!(
        "{}-{}",
        hex::encode(digest),
        part_etags.len()
    )))
}

/// `POST /{bucket}/{key}?uploads` -- CreateMultipartUpload
#[instrument(skip(state, identity, headers))]
pub async fn create_multipart_upload(
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

    let upload_id = new_upload_id();
    let (owner_id, owner_display) = effective_owner(&state, identity);
    let acl = super::acl_from_headers(headers, &owner_id, &owner_display)?;
    let content = extract_content_headers(headers);

    let record = MultipartUploadRecord {
        upload_id: upload_id.clone(),
        bucket: bucket.to_string(),
        key: key.to_string(),
        content_type: extract_content_type(headers),
        content_encoding: content.content_encoding,
        content_language: content.content_language,
        content_disposition: content.content_disposition,
        cache_control: content.cache_control,
        expires: content.expires,
        storage_class: extract_storage_class(headers),
        acl,
        user_metadata: extract_user_metadata(headers),
        owner_id,
        owner_display,
        initiated_at: Utc::now(),
    };

    state.metadata.create_multipart_upload(record).await?;
    info!("CreateMultipartUpload {}/{} -> {}", bucket, key, upload_id);

    let result = InitiateMultipartUploadResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id,
    };
    Ok(xml_response(result.to_xml()))
}

/// `PUT /{bucket}/{key}?partNumber={n}&uploadId={id}` -- UploadPart
///
/// The recorded size is the byte count actually streamed to disk, not the
/// client's Content-Length.
#[instrument(skip(state, query, headers, body))]
pub async fn upload_part(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, S3Error> {
    let upload_id = query_required(query, "uploadId")?.to_string();
    let part_number = parse_part_number(query)?;
    resolve_upload(&state, bucket, key, &upload_id).await?;

    let expected_md5 = extract_content_md5(headers)?;
    let blob = state
        .storage
        .put_part(
            bucket,
            &upload_id,
            part_number,
            super::body_reader(body, headers),
            expected_md5,
        )
        .await?;
    let etag = quote_etag(&blob.md5_hex);

    state
        .metadata
        .put_part(
            &upload_id,
            PartRecord {
                part_number,
                size: blob.size,
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        )
        .await?;

    info!(
        "UploadPart {}/{} part={} uploadId={} ({} bytes)",
        bucket, key, part_number, upload_id, blob.size
    );

    let mut response = StatusCode::OK.into_response();
    response.headers_mut().insert(header::ETAG, hval(&etag));
    Ok(response)
}

/// `PUT /{bucket}/{key}?partNumber={n}&uploadId={id}` with
/// `x-amz-copy-source` -- UploadPartCopy
#[instrument(skip(state, query, headers))]
pub async fn upload_part_copy(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let upload_id = query_required(query, "uploadId")?.to_string();
    let part_number = parse_part_number(query)?;
    resolve_upload(&state, bucket, key, &upload_id).await?;

    let (src_bucket, src_key) = parse_copy_source(headers)?;
    if !state.metadata.bucket_exists(&src_bucket).await? {
        return Err(S3Error::NoSuchBucket(src_bucket));
    }
    let source = state
        .metadata
        .get_object(&src_bucket, &src_key)
        .await?
        .ok_or_else(|| S3Error::NoSuchKey(src_key.clone()))?;

    let range = match headers
        .get("x-amz-copy-source-range")
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => Some(parse_range(value, source.size).map_err(|_| {
            S3Error::InvalidRange {
                total_size: source.size,
            }
        })?),
        None => None,
    };

    let stream = state
        .storage
        .get_object(&src_bucket, &src_key, range)
        .await?;
    let reader = Box::new(StreamReader::new(stream));
    let blob = state
        .storage
        .put_part(bucket, &upload_id, part_number, reader, None)
        .await?;
    let etag = quote_etag(&blob.md5_hex);
    let now = Utc::now();

    state
        .metadata
        .put_part(
            &upload_id,
            PartRecord {
                part_number,
                size: blob.size,
                etag: etag.clone(),
                last_modified: now,
            },
        )
        .await?;

    info!(
        "UploadPartCopy {}/{} <- {}/{} part={} ({} bytes)",
        bucket, key, src_bucket, src_key, part_number, blob.size
    );

    let result = CopyObjectResult {
        etag,
        last_modified: now,
    };
    Ok(xml_response(result.to_copy_part_xml()))
}

/// `POST /{bucket}/{key}?uploadId={id}` -- CompleteMultipartUpload
///
/// Order of operations: assemble the object file first, then one metadata
/// transaction swaps the object row in and the upload + parts out, then the
/// part files are cleaned up best-effort. A failure before the transaction
/// leaves metadata untouched; a failure after assembly leaves only an
/// orphaned file.
#[instrument(skip(state, query, body))]
pub async fn complete_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    body: &[u8],
) -> Result<Response, S3Error> {
    let upload_id = query_required(query, "uploadId")?.to_string();
    let upload = resolve_upload(&state, bucket, key, &upload_id).await?;

    let requested = parse_complete_multipart_upload(body).ok_or(S3Error::MalformedXML)?;

    // Strictly ascending part numbers; any duplicate or inversion rejects.
    for window in requested.windows(2) {
        if window[0].0 >= window[1].0 {
            return Err(S3Error::InvalidPartOrder);
        }
    }

    let numbers: Vec<u32> = requested.iter().map(|(n, _)| *n).collect();
    let stored = state
        .metadata
        .get_parts_for_completion(&upload_id, &numbers)
        .await?;
    let stored_map: HashMap<u32, &PartRecord> =
        stored.iter().map(|p| (p.part_number, p)).collect();

    let mut part_etags = Vec::with_capacity(requested.len());
    for (i, (part_number, requested_etag)) in requested.iter().enumerate() {
        let part = stored_map
            .get(part_number)
            .ok_or_else(|| S3Error::InvalidPart(format!("part {part_number}")))?;
        if unquote_etag(requested_etag) != unquote_etag(&part.etag) {
            return Err(S3Error::InvalidPart(format!("part {part_number}")));
        }
        // Every part except the last must reach the 5 MiB floor.
        let is_last = i == requested.len() - 1;
        if !is_last && part.size < MIN_PART_SIZE {
            return Err(S3Error::EntityTooSmall);
        }
        part_etags.push(part.etag.clone());
    }

    let etag = composite_etag(&part_etags)?;

    // Storage first: the object file must exist in full before the row
    // that makes it visible.
    let total_size = state
        .storage
        .assemble_parts(bucket, key, &upload_id, &numbers)
        .await?;

    let record = ObjectRecord {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: total_size,
        etag: etag.clone(),
        content_type: upload.content_type,
        content_encoding: upload.content_encoding,
        content_language: upload.content_language,
        content_disposition: upload.content_disposition,
        cache_control: upload.cache_control,
        expires: upload.expires,
        storage_class: upload.storage_class,
        acl: upload.acl,
        user_metadata: upload.user_metadata,
        last_modified: Utc::now(),
    };

    state
        .metadata
        .complete_multipart_upload(&upload_id, record)
        .await?;

    state.storage.delete_parts(bucket, &upload_id).await;
    info!(
        "CompleteMultipartUpload {}/{} uploadId={} ({} parts, {} bytes)",
        bucket,
        key,
        upload_id,
        numbers.len(),
        total_size
    );

    let result = CompleteMultipartUploadResult {
        location: format!("/{bucket}/{key}"),
        bucket: bucket.to_string(),
        key: key.to_string(),
        etag,
    };
    Ok(xml_response(result.to_xml()))
}

/// `DELETE /{bucket}/{key}?uploadId={id}` -- AbortMultipartUpload
///
/// Idempotent at the HTTP level: aborting an unknown upload is still 204.
#[instrument(skip(state, query))]
pub async fn abort_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let upload_id = query_required(query, "uploadId")?.to_string();

    match state.metadata.get_multipart_upload(&upload_id).await? {
        None => {}
        Some(upload) if upload.bucket != bucket || upload.key != key => {
            return Err(S3Error::NoSuchUpload(upload_id));
        }
        Some(_) => {
            state.storage.delete_parts(bucket, &upload_id).await;
            state.metadata.abort_multipart_upload(&upload_id).await?;
            info!("AbortMultipartUpload {}/{} uploadId={}", bucket, key, upload_id);
        }
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}/{key}?uploadId={id}` -- ListParts
#[instrument(skip(state, query))]
pub async fn list_parts(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let upload_id = query_required(query, "uploadId")?.to_string();
    let upload = resolve_upload(&state, bucket, key, &upload_id).await?;

    let max_parts: u32 = match query.get("max-parts") {
        None => MAX_LIST_KEYS,
        Some(raw) => raw
            .parse::<u32>()
            .map(|v| v.min(MAX_LIST_KEYS))
            .map_err(|_| S3Error::InvalidArgument(format!("Invalid max-parts: {raw}")))?,
    };
    let part_number_marker: u32 = match query.get("part-number-marker") {
        None => 0,
        Some(raw) => raw
            .parse()
            .map_err(|_| S3Error::InvalidArgument(format!("Invalid part-number-marker: {raw}")))?,
    };

    let listing = state
        .metadata
        .list_parts(&upload_id, max_parts, part_number_marker)
        .await?;

    let result = ListPartsResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id,
        owner_id: upload.owner_id,
        owner_display: upload.owner_display,
        storage_class: upload.storage_class,
        part_number_marker,
        next_part_number_marker: listing.next_part_number_marker,
        max_parts,
        is_truncated: listing.is_truncated,
        parts: listing.parts,
    };
    Ok(xml_response(result.to_xml()))
}

/// `GET /{bucket}?uploads` -- ListMultipartUploads
#[instrument(skip(state, query))]
pub async fn list_multipart_uploads(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }

    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let key_marker = query.get("key-marker").cloned().unwrap_or_default();
    let upload_id_marker = query.get("upload-id-marker").cloned().unwrap_or_default();
    let max_uploads: u32 = match query.get("max-uploads") {
        None => MAX_LIST_KEYS,
        Some(raw) => raw
            .parse::<u32>()
            .map(|v| v.min(MAX_LIST_KEYS))
            .map_err(|_| S3Error::InvalidArgument(format!("Invalid max-uploads: {raw}")))?,
    };

    let listing = state
        .metadata
        .list_multipart_uploads(bucket, &prefix, max_uploads, &key_marker, &upload_id_marker)
        .await?;

    let result = ListMultipartUploadsResult {
        bucket: bucket.to_string(),
        prefix,
        key_marker,
        upload_id_marker,
        next_key_marker: listing.next_key_marker,
        next_upload_id_marker: listing.next_upload_id_marker,
        max_uploads,
        is_truncated: listing.is_truncated,
        uploads: listing.uploads,
    };
    Ok(xml_response(result.to_xml()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_etag_known_value() {
        // Two parts with known MD5s; the composite is the MD5 of the raw
        // digest concatenation with the part count appended.
        let e1 = hex::encode(Md5::digest(b"part one"));
        let e2 = hex::encode(Md5::digest(b"part two"));
        let composite = composite_etag(&[quote_etag(&e1), quote_etag(&e2)]).unwrap();

        let mut concat = Vec::new();
        concat.extend_from_slice(&Md5::digest(b"part one"));
        concat.extend_from_slice(&Md5::digest(b"part two"));
        let expected = format!("\"{}-2\"", hex::encode(Md5::digest(&concat)));
        assert_eq!(composite, expected);
    }

    #[test]
    fn test_composite_etag_suffix_is_part_count() {
        let etags: Vec<String> = (0..3)
            .map(|i| quote_etag(&hex::encode(Md5::digest([i as u8]))))
            .collect();
        let composite = composite_etag(&etags).unwrap();
        assert!(composite.ends_with("-3\""));
    }

    #[test]
    fn test_composite_etag_rejects_garbage() {
        assert!(composite_etag(&["\"not-hex\"".to_string()]).is_err());
        assert!(composite_etag(&["\"abcd\"".to_string()]).is_err());
    }

    #[test]
    fn test_parse_part_number_bounds() {
        let q = |v: &str| {
            let mut m = HashMap::new();
            m.insert("partNumber".to_string(), v.to_string());
            m.insert("uploadId".to_string(), "u".to_string());
            m
        };
        assert_eq!(parse_part_number(&q("1")).unwrap(), 1);
        assert_eq!(parse_part_number(&q("10000")).unwrap(), 10000);
        assert!(parse_part_number(&q("0")).is_err());
        assert!(parse_part_number(&q("10001")).is_err());
        assert!(parse_part_number(&q("abc")).is_err());
        assert!(parse_part_number(&HashMap::new()).is_err());
    }
}
