//! Bucket-level S3 handlers: CRUD, ACLs, location, and object listings.

use super::{
    acl_from_request, effective_owner, hval, xml_response, S3Error,
};
use crate::acl::AccessControlPolicy;
use crate::api::xml::{
    location_constraint_xml, ListBucketResult, ListBucketsResult, ListPagination,
};
use crate::auth::Identity;
use crate::metadata::ListObjectsQuery;
use crate::types::{validate_bucket_name, BucketRecord, MAX_LIST_KEYS};
use crate::AppState;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Optional CreateBucket request body.
#[derive(Debug, Deserialize)]
struct CreateBucketConfiguration {
    #[serde(rename = "LocationConstraint")]
    location_constraint: Option<String>,
}

/// `GET /` -- ListBuckets
#[instrument(skip(state))]
pub async fn list_buckets(state: Arc<AppState>) -> Result<Response, S3Error> {
    let buckets = state.metadata.list_buckets().await?;
    let result = ListBucketsResult {
        owner_id: &state.config.owner.access_key_id,
        owner_display_name: &state.config.owner.display_name,
        buckets: &buckets,
    };
    Ok(xml_response(result.to_xml()))
}

/// `PUT /{bucket}` -- CreateBucket
///
/// Idempotent for the owning tenant: re-creating an owned bucket returns
/// 200 with the Location header, matching AWS us-east-1 behaviour.
#[instrument(skip(state, headers, body))]
pub async fn create_bucket(
    state: Arc<AppState>,
    bucket: &str,
    identity: Option<&Identity>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    validate_bucket_name(bucket)
        .map_err(|e| S3Error::InvalidBucketName(e.to_string()))?;

    let region = if body.is_empty() {
        state.config.region.clone()
    } else {
        let config: CreateBucketConfiguration =
            quick_xml::de::from_str(std::str::from_utf8(body).map_err(|_| S3Error::MalformedXML)?)
                .map_err(|_| S3Error::MalformedXML)?;
        config
            .location_constraint
            .unwrap_or_else(|| state.config.region.clone())
    };

    let (owner_id, owner_display) = effective_owner(&state, identity);
    let acl = super::acl_from_headers(headers, &owner_id, &owner_display)?;

    let record = BucketRecord {
        name: bucket.to_string(),
        region,
        owner_id: owner_id.clone(),
        owner_display,
        acl,
        created_at: Utc::now(),
    };

    match state.metadata.create_bucket(record).await {
        Ok(()) => {}
        Err(crate::metadata::MetadataError::BucketAlreadyExists(_)) => {
            // Same-owner re-create is a no-op success; a clash with another
            // tenant's bucket is the 409.
            let existing = state
                .metadata
                .get_bucket(bucket)
                .await?
                .ok_or_else(|| S3Error::InternalError("bucket vanished during create".into()))?;
            if existing.owner_id != owner_id {
                return Err(S3Error::BucketAlreadyExists(bucket.to_string()));
            }
        }
        Err(e) => return Err(e.into()),
    }

    state.storage.create_bucket(bucket).await?;
    info!("Created bucket {bucket}");

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert("Location", hval(&format!("/{bucket}")));
    Ok(response)
}

/// `DELETE /{bucket}` -- DeleteBucket
#[instrument(skip(state))]
pub async fn delete_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    state.metadata.delete_bucket(bucket).await?;
    // Bytes go best-effort after the row; a leftover directory is an orphan.
    state.storage.delete_bucket(bucket).await;
    info!("Deleted bucket {bucket}");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `HEAD /{bucket}` -- HeadBucket
#[instrument(skip(state))]
pub async fn head_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    let record = state
        .metadata
        .get_bucket(bucket)
        .await?
        .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;
    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert("x-amz-bucket-region", hval(&record.region));
    Ok(response)
}

/// `GET /{bucket}?location` -- GetBucketLocation
#[instrument(skip(state))]
pub async fn get_bucket_location(
    state: Arc<AppState>,
    bucket: &str,
) -> Result<Response, S3Error> {
    let record = state
        .metadata
        .get_bucket(bucket)
        .await?
        .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;
    Ok(xml_response(location_constraint_xml(&record.region)))
}

/// `GET /{bucket}?acl` -- GetBucketAcl
#[instrument(skip(state))]
pub async fn get_bucket_acl(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    let record = state
        .metadata
        .get_bucket(bucket)
        .await?
        .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;
    let policy = AccessControlPolicy::from_json_or_default(
        &record.acl,
        &record.owner_id,
        &record.owner_display,
    );
    Ok(xml_response(policy.to_xml()))
}

/// `PUT /{bucket}?acl` -- PutBucketAcl
#[instrument(skip(state, headers, body))]
pub async fn put_bucket_acl(
    state: Arc<AppState>,
    bucket: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    let record = state
        .metadata
        .get_bucket(bucket)
        .await?
        .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;
    let acl = acl_from_request(headers, body, &record.owner_id, &record.owner_display)?;
    state.metadata.update_bucket_acl(bucket, &acl).await?;
    Ok(StatusCode::OK.into_response())
}

/// Parse and clamp the `max-keys` style parameter.
fn parse_max_keys(query: &HashMap<String, String>, name: &str) -> Result<u32, S3Error> {
    match query.get(name) {
        None => Ok(MAX_LIST_KEYS),
        Some(raw) => raw
            .parse::<u32>()
            .map(|v| v.min(MAX_LIST_KEYS))
            .map_err(|_| S3Error::InvalidArgument(format!("Invalid {name}: {raw}"))),
    }
}

fn query_str<'a>(query: &'a HashMap<String, String>, name: &str) -> &'a str {
    query.get(name).map(String::as_str).unwrap_or("")
}

/// `GET /{bucket}` -- ListObjects (v1)
#[instrument(skip(state, query))]
pub async fn list_objects_v1(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }

    let prefix = query_str(query, "prefix").to_string();
    let delimiter = query_str(query, "delimiter").to_string();
    let marker = query_str(query, "marker").to_string();
    let max_keys = parse_max_keys(query, "max-keys")?;

    let listing = state
        .metadata
        .list_objects(
            bucket,
            &ListObjectsQuery {
                prefix: prefix.clone(),
                delimiter: delimiter.clone(),
                start_after: marker.clone(),
                max_keys,
            },
        )
        .await?;

    let result = ListBucketResult {
        name: bucket.to_string(),
        prefix,
        delimiter: (!delimiter.is_empty()).then_some(delimiter),
        max_keys,
        is_truncated: listing.is_truncated,
        encoding_type: query.get("encoding-type").cloned(),
        contents: listing.objects,
        common_prefixes: listing.common_prefixes,
        pagination: ListPagination::V1 {
            marker,
            next_marker: listing.next_marker,
        },
    };
    Ok(xml_response(result.to_xml()))
}

/// `GET /{bucket}?list-type=2` -- ListObjectsV2
///
/// `continuation-token` takes priority over `start-after`.
#[instrument(skip(state, query))]
pub async fn list_objects_v2(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    if !state.metadata.bucket_exists(bucket).await? {
        return Err(S3Error::NoSuchBucket(bucket.to_string()));
    }

    let prefix = query_str(query, "prefix").to_string();
    let delimiter = query_str(query, "delimiter").to_string();
    let continuation_token = query.get("continuation-token").cloned();
    let start_after = query.get("start-after").cloned();
    let max_keys = parse_max_keys(query, "max-keys")?;

    let effective_start = continuation_token
        .clone()
        .or_else(|| start_after.clone())
        .unwrap_or_default();

    let listing = state
        .metadata
        .list_objects(
            bucket,
            &ListObjectsQuery {
                prefix: prefix.clone(),
                delimiter: delimiter.clone(),
                start_after: effective_start,
                max_keys,
            },
        )
        .await?;

    let result = ListBucketResult {
        name: bucket.to_string(),
        prefix,
        delimiter: (!delimiter.is_empty()).then_some(delimiter),
        max_keys,
        is_truncated: listing.is_truncated,
        encoding_type: query.get("encoding-type").cloned(),
        contents: listing.objects,
        common_prefixes: listing.common_prefixes,
        pagination: ListPagination::V2 {
            continuation_token,
            next_continuation_token: listing.next_marker,
            start_after,
        },
    };
    Ok(xml_response(result.to_xml()))
}
