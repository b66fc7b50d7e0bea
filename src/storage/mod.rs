//! Storage backend trait definitions
//!
//! The backend owns the bytes; the metadata store owns visibility. Every
//! write lands in a temp file, is fsynced, then renamed into place, so a
//! reader always observes either the previous blob in full or the new one
//! in full. Storage writes complete before metadata commits; files with no
//! metadata row are harmless orphans.

pub mod filesystem;

pub use filesystem::FilesystemBackend;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Streamed blob contents. Errors are plain IO errors so the stream plugs
/// straight into an HTTP response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Streamed request body fed into a write.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a completed write: how many bytes landed and their MD5.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub size: u64,
    pub md5_hex: String,
}

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("Content digest mismatch")]
    DigestMismatch,

    #[error("Storage error: {0}")]
    Other(String),
}

/// Abstract content store for object and part bytes.
///
/// This trait is object-safe and can be used with `Arc<dyn StorageBackend>`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create the on-disk directories for a new bucket.
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Remove a bucket's directory tree. Best-effort: failures are logged,
    /// never surfaced.
    async fn delete_bucket(&self, bucket: &str);

    /// Stream an object body into place atomically, computing MD5 on the way.
    /// When `expected_md5` is set (Content-MD5 header) a mismatch aborts the
    /// write before the rename and nothing becomes visible.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: BodyReader,
        expected_md5: Option<[u8; 16]>,
    ) -> Result<StoredBlob, StorageError>;

    /// Open an object for streamed reading. `range` is an inclusive byte
    /// span already validated against the object size.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStream, StorageError>;

    /// Copy an object's bytes to a new location through the same
    /// temp-fsync-rename discipline. Returns the destination digest.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<StoredBlob, StorageError>;

    /// Remove an object file. Best-effort and idempotent.
    async fn delete_object(&self, bucket: &str, key: &str);

    /// Stream a part body into the upload's staging directory.
    async fn put_part(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
        body: BodyReader,
        expected_md5: Option<[u8; 16]>,
    ) -> Result<StoredBlob, StorageError>;

    /// Concatenate the given parts (in the order supplied) into the final
    /// object file, atomically. Streams through a bounded buffer, never
    /// holds all part bytes in memory. Returns the total byte count.
    async fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<u64, StorageError>;

    /// Remove an upload's staging directory. Best-effort.
    async fn delete_parts(&self, bucket: &str, upload_id: &str);

    /// Verify the storage root is writable.
    async fn health_check(&self) -> Result<(), StorageError>;
}
