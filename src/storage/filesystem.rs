//! Filesystem storage backend with crash-only atomic writes.
//!
//! Storage layout:
//! ```text
//! {root}/{bucket}/objects/{key}                      # final object bytes
//! {root}/{bucket}/uploads/{upload_id}/{NNNNN}.part   # staged multipart parts
//! ```
//!
//! Object keys may contain `/` and are used verbatim as nested directories.
//! Every write follows temp-file -> fsync(file) -> rename -> fsync(dir), so a
//! crash at any point leaves either the previous version or an unreferenced
//! temp file, never a torn object.

use super::{BodyReader, ByteStream, StorageBackend, StorageError, StoredBlob};
use async_trait::async_trait;
use futures::StreamExt;
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

/// Scratch buffer size for streamed writes and part assembly.
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Async-safe path existence check (avoids blocking the Tokio runtime)
async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// fsync a directory so a completed rename survives power loss.
async fn sync_dir(dir: &Path) -> Result<(), StorageError> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::open(&dir)?.sync_all()?;
        Ok::<_, std::io::Error>(())
    })
    .await
    .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {e}")))?
    .map_err(StorageError::Io)
}

/// Filesystem storage backend
pub struct FilesystemBackend {
    /// Root directory for all data
    root: PathBuf,
    /// Upper bound on a single object or part body
    max_object_size: u64,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: PathBuf, max_object_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            max_object_size,
        })
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_dir(bucket).join("objects");
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    fn upload_dir(&self, bucket: &str, upload_id: &str) -> PathBuf {
        self.bucket_dir(bucket).join("uploads").join(upload_id)
    }

    fn part_path(&self, bucket: &str, upload_id: &str, part_number: u32) -> PathBuf {
        self.upload_dir(bucket, upload_id)
            .join(format!("{part_number:05}.part"))
    }

    /// Stream `body` into `final_path` via a uniquely-named temp file in the
    /// same directory, computing MD5 incrementally.
    async fn write_atomic(
        &self,
        final_path: &Path,
        mut body: BodyReader,
        expected_md5: Option<[u8; 16]>,
    ) -> Result<StoredBlob, StorageError> {
        let parent = final_path
            .parent()
            .ok_or_else(|| StorageError::Other("write target has no parent directory".into()))?;
        fs::create_dir_all(parent).await?;

        let tmp_path = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let result = self
            .write_temp(&tmp_path, &mut body, expected_md5, final_path)
            .await;
        if result.is_err() {
            // Leave no temp behind on a failed or aborted write.
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }

    async fn write_temp(
        &self,
        tmp_path: &Path,
        body: &mut BodyReader,
        expected_md5: Option<[u8; 16]>,
        final_path: &Path,
    ) -> Result<StoredBlob, StorageError> {
        let mut file = fs::File::create(tmp_path).await?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > self.max_object_size {
                return Err(StorageError::TooLarge {
                    size: written,
                    max: self.max_object_size,
                });
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }

        file.sync_all().await?;
        drop(file);

        let digest: [u8; 16] = hasher.finalize().into();
        if let Some(expected) = expected_md5 {
            if digest != expected {
                return Err(StorageError::DigestMismatch);
            }
        }

        fs::rename(tmp_path, final_path).await?;
        if let Some(parent) = final_path.parent() {
            sync_dir(parent).await?;
        }

        Ok(StoredBlob {
            size: written,
            md5_hex: hex::encode(digest),
        })
    }

    /// Remove now-empty key directories between a deleted object and the
    /// bucket's `objects/` root. Best-effort.
    async fn prune_empty_dirs(&self, bucket: &str, path: &Path) {
        let stop = self.bucket_dir(bucket).join("objects");
        let mut current = path.parent().map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == stop {
                break;
            }
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let dir = self.bucket_dir(bucket);
        fs::create_dir_all(dir.join("objects")).await?;
        fs::create_dir_all(dir.join("uploads")).await?;
        debug!("Created bucket directories under {:?}", dir);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket: &str) {
        let dir = self.bucket_dir(bucket);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove bucket directory {:?}: {}", dir, e);
            }
        }
    }

    #[instrument(skip(self, body, expected_md5))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: BodyReader,
        expected_md5: Option<[u8; 16]>,
    ) -> Result<StoredBlob, StorageError> {
        let path = self.object_path(bucket, key);
        let blob = self.write_atomic(&path, body, expected_md5).await?;
        debug!("Wrote object {}/{} ({} bytes)", bucket, key, blob.size);
        Ok(blob)
    }

    #[instrument(skip(self))]
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStream, StorageError> {
        let path = self.object_path(bucket, key);
        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!("{bucket}/{key}")));
            }
            Err(e) => return Err(e.into()),
        };

        match range {
            Some((start, end)) => {
                file.seek(std::io::SeekFrom::Start(start)).await?;
                let limited = file.take(end - start + 1);
                Ok(ReaderStream::with_capacity(limited, COPY_BUF_SIZE).boxed())
            }
            None => Ok(ReaderStream::with_capacity(file, COPY_BUF_SIZE).boxed()),
        }
    }

    #[instrument(skip(self))]
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<StoredBlob, StorageError> {
        let src_path = self.object_path(src_bucket, src_key);
        if !path_exists(&src_path).await {
            return Err(StorageError::NotFound(format!("{src_bucket}/{src_key}")));
        }
        let reader = fs::File::open(&src_path).await?;
        let dst_path = self.object_path(dst_bucket, dst_key);
        let blob = self.write_atomic(&dst_path, Box::new(reader), None).await?;
        debug!(
            "Copied {}/{} -> {}/{} ({} bytes)",
            src_bucket, src_key, dst_bucket, dst_key, blob.size
        );
        Ok(blob)
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) {
        let path = self.object_path(bucket, key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_dirs(bucket, &path).await;
                debug!("Deleted object file {}/{}", bucket, key);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete object file {:?}: {}", path, e),
        }
    }

    #[instrument(skip(self, body, expected_md5))]
    async fn put_part(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
        body: BodyReader,
        expected_md5: Option<[u8; 16]>,
    ) -> Result<StoredBlob, StorageError> {
        let path = self.part_path(bucket, upload_id, part_number);
        let blob = self.write_atomic(&path, body, expected_md5).await?;
        debug!(
            "Wrote part {} of upload {} ({} bytes)",
            part_number, upload_id, blob.size
        );
        Ok(blob)
    }

    #[instrument(skip(self, part_numbers))]
    async fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<u64, StorageError> {
        let final_path = self.object_path(bucket, key);
        let parent = final_path
            .parent()
            .ok_or_else(|| StorageError::Other("assembly target has no parent".into()))?;
        fs::create_dir_all(parent).await?;

        let tmp_path = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let result = async {
            let mut out = fs::File::create(&tmp_path).await?;
            let mut buf = vec![0u8; COPY_BUF_SIZE];
            let mut total: u64 = 0;

            for &part_number in part_numbers {
                let part_path = self.part_path(bucket, upload_id, part_number);
                let mut part = match fs::File::open(&part_path).await {
                    Ok(f) => f,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(StorageError::NotFound(format!(
                            "part {part_number} of upload {upload_id}"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                };
                loop {
                    let n = part.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    total += n as u64;
                    out.write_all(&buf[..n]).await?;
                }
            }

            out.sync_all().await?;
            drop(out);
            fs::rename(&tmp_path, &final_path).await?;
            sync_dir(parent).await?;
            Ok(total)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        if let Ok(total) = &result {
            debug!(
                "Assembled {} parts into {}/{} ({} bytes)",
                part_numbers.len(),
                bucket,
                key,
                total
            );
        }
        result
    }

    #[instrument(skip(self))]
    async fn delete_parts(&self, bucket: &str, upload_id: &str) {
        let dir = self.upload_dir(bucket, upload_id);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove upload directory {:?}: {}", dir, e);
            }
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let probe = self
            .root
            .join(format!(".health_probe.{}", uuid::Uuid::new_v4().simple()));
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }
}
