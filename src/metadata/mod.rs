//! Metadata index: the transactional source of truth for buckets, objects,
//! multipart uploads, parts, and credentials.
//!
//! Storage bytes live on the filesystem (see [`crate::storage`]); a row here
//! is what makes them externally visible. Every write that touches more than
//! one row (complete, abort, batch delete, delete-bucket) is atomic.

pub mod sqlite;

use crate::types::{
    BucketRecord, Credential, MultipartUploadRecord, ObjectRecord, PartRecord,
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during metadata operations
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metadata error: {0}")]
    Other(String),
}

/// Parameters for an object listing call (V1 and V2 share these).
#[derive(Debug, Clone, Default)]
pub struct ListObjectsQuery {
    pub prefix: String,
    pub delimiter: String,
    /// Exclusive lower bound: V1 `marker`, V2 continuation token, or
    /// V2 `start-after` (the store does not care which).
    pub start_after: String,
    /// Clamped to 1000 by the store.
    pub max_keys: u32,
}

/// Result of an object listing call.
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub objects: Vec<ObjectRecord>,
    /// Deduplicated, lexicographically sorted.
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Last key or common prefix emitted, set only when truncated.
    pub next_marker: Option<String>,
}

/// Result of a multipart-upload listing call.
#[derive(Debug, Clone, Default)]
pub struct UploadListing {
    pub uploads: Vec<MultipartUploadRecord>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Result of a part listing call.
#[derive(Debug, Clone, Default)]
pub struct PartListing {
    pub parts: Vec<PartRecord>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

/// Abstract transactional metadata index.
///
/// This trait is object-safe and can be used with `Arc<dyn MetadataStore>`.
/// Readers see a consistent snapshot within each call; multi-row writes
/// commit atomically.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // === Bucket operations ===

    /// Create a bucket row. Fails with `BucketAlreadyExists` on a duplicate name.
    async fn create_bucket(&self, bucket: BucketRecord) -> Result<(), MetadataError>;

    /// Fetch a bucket row, `None` when absent.
    async fn get_bucket(&self, name: &str) -> Result<Option<BucketRecord>, MetadataError>;

    /// Check bucket existence.
    async fn bucket_exists(&self, name: &str) -> Result<bool, MetadataError>;

    /// List all buckets in name-ascending order.
    async fn list_buckets(&self) -> Result<Vec<BucketRecord>, MetadataError>;

    /// Replace a bucket's stored ACL blob.
    async fn update_bucket_acl(&self, name: &str, acl: &str) -> Result<(), MetadataError>;

    /// Delete a bucket. Fails with `BucketNotEmpty` while any object or
    /// multipart upload still references it.
    async fn delete_bucket(&self, name: &str) -> Result<(), MetadataError>;

    // === Credential operations ===

    /// Insert or replace a credential row.
    async fn put_credential(&self, credential: Credential) -> Result<(), MetadataError>;

    /// Look up a credential by access key id. Returns `None` when absent
    /// or inactive.
    async fn get_credential(&self, access_key_id: &str)
        -> Result<Option<Credential>, MetadataError>;

    // === Object operations ===

    /// Upsert an object row by `(bucket, key)`.
    async fn put_object(&self, object: ObjectRecord) -> Result<(), MetadataError>;

    /// Fetch an object row, `None` when absent.
    async fn get_object(&self, bucket: &str, key: &str)
        -> Result<Option<ObjectRecord>, MetadataError>;

    /// Delete an object row. Idempotent: deleting an absent row is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), MetadataError>;

    /// Delete a batch of object rows in one transaction.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), MetadataError>;

    /// Replace an object's stored ACL blob.
    async fn update_object_acl(
        &self,
        bucket: &str,
        key: &str,
        acl: &str,
    ) -> Result<(), MetadataError>;

    /// List objects in lexicographic key order with prefix/delimiter folding.
    async fn list_objects(
        &self,
        bucket: &str,
        query: &ListObjectsQuery,
    ) -> Result<ObjectListing, MetadataError>;

    // === Multipart operations ===

    /// Record a fresh multipart upload.
    async fn create_multipart_upload(
        &self,
        upload: MultipartUploadRecord,
    ) -> Result<(), MetadataError>;

    /// Fetch an upload row, `None` when absent.
    async fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Result<Option<MultipartUploadRecord>, MetadataError>;

    /// Upsert a part row by `(upload_id, part_number)`.
    async fn put_part(&self, upload_id: &str, part: PartRecord) -> Result<(), MetadataError>;

    /// Fetch the stored part rows matching the requested part numbers,
    /// in ascending part-number order.
    async fn get_parts_for_completion(
        &self,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<Vec<PartRecord>, MetadataError>;

    /// List parts of an upload with marker pagination.
    async fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> Result<PartListing, MetadataError>;

    /// List in-progress uploads for a bucket, paginated by
    /// `(key_marker, upload_id_marker)`.
    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> Result<UploadListing, MetadataError>;

    /// Atomically materialise a completed upload: upsert the object row,
    /// delete all part rows, delete the upload row, all in one transaction.
    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        object: ObjectRecord,
    ) -> Result<(), MetadataError>;

    /// Delete an upload and all its parts in one transaction.
    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<(), MetadataError>;
}
