//! Core record types shared by the metadata store, storage backend, and handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Maximum object key length in bytes (after URI decoding).
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum number of keys returned by a single listing call.
pub const MAX_LIST_KEYS: u32 = 1000;

/// Minimum size of every multipart part except the last (5 MiB).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// S3 response header prefix for user-defined metadata.
pub const AMZ_META_PREFIX: &str = "x-amz-meta-";

/// A bucket row in the metadata index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRecord {
    pub name: String,
    pub region: String,
    pub owner_id: String,
    pub owner_display: String,
    /// ACL stored as serialized [`crate::acl::AccessControlPolicy`] JSON.
    pub acl: String,
    pub created_at: DateTime<Utc>,
}

/// An object row in the metadata index. Primary key is `(bucket, key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Always stored quoted: `"<md5hex>"` or `"<md5hex>-<N>"` for multipart.
    pub etag: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
    pub storage_class: String,
    pub acl: String,
    /// Keys are lowercased `x-amz-meta-*` suffixes.
    pub user_metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

/// An in-progress multipart upload row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadRecord {
    /// 32 lowercase hex characters (v4 UUID, hyphens stripped).
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
    pub storage_class: String,
    pub acl: String,
    pub user_metadata: HashMap<String, String>,
    pub owner_id: String,
    pub owner_display: String,
    pub initiated_at: DateTime<Utc>,
}

/// One uploaded part of a multipart upload. Primary key `(upload_id, part_number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_number: u32,
    pub size: u64,
    /// Quoted lowercase-hex MD5 of the part bytes.
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// A signing credential looked up by access key id during SigV4 verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_key_id: String,
    pub secret_key: String,
    pub owner_id: String,
    pub display_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Generate a fresh opaque upload id: a v4 UUID rendered as 32 lowercase
/// hex characters with the hyphens stripped.
pub fn new_upload_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Quote an unquoted hex ETag for the wire.
pub fn quote_etag(hex: &str) -> String {
    format!("\"{hex}\"")
}

/// Strip the surrounding double quotes from a wire ETag, if present.
pub fn unquote_etag(etag: &str) -> &str {
    etag.trim_matches('"')
}

/// Error returned when a user-supplied bucket name fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNameError(pub String);

impl fmt::Display for BucketNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BucketNameError {}

/// Validate a bucket name against the S3 naming rules:
/// 3-63 bytes; lowercase letters, digits, `.`, `-`; must begin and end
/// alphanumeric; not formatted like an IPv4 address; no `xn--` prefix;
/// no `-s3alias` or `--ol-s3` suffix; no consecutive dots.
pub fn validate_bucket_name(name: &str) -> Result<(), BucketNameError> {
    if name.len() < 3 || name.len() > 63 {
        return Err(BucketNameError(
            "Bucket name must be between 3 and 63 characters long".to_string(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err(BucketNameError(
            "Bucket name may contain only lowercase letters, digits, '.' and '-'".to_string(),
        ));
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !(first.is_ascii_lowercase() || first.is_ascii_digit())
        || !(last.is_ascii_lowercase() || last.is_ascii_digit())
    {
        return Err(BucketNameError(
            "Bucket name must begin and end with a letter or digit".to_string(),
        ));
    }
    if name.contains("..") {
        return Err(BucketNameError(
            "Bucket name must not contain consecutive dots".to_string(),
        ));
    }
    if is_ipv4_like(name) {
        return Err(BucketNameError(
            "Bucket name must not be formatted like an IP address".to_string(),
        ));
    }
    if name.starts_with("xn--") {
        return Err(BucketNameError(
            "Bucket name must not start with 'xn--'".to_string(),
        ));
    }
    if name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return Err(BucketNameError(
            "Bucket name must not end with a reserved suffix".to_string(),
        ));
    }
    Ok(())
}

/// True when the name consists of exactly four dot-separated decimal octets.
fn is_ipv4_like(name: &str) -> bool {
    let octets: Vec<&str> = name.split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    octets
        .iter()
        .all(|o| !o.is_empty() && o.len() <= 3 && o.bytes().all(|b| b.is_ascii_digit()))
}
