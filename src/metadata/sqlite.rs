//! SQLite-backed metadata index.
//!
//! A single bundled-SQLite connection behind a mutex: SQLite serialises
//! writers anyway, and one connection keeps transaction semantics simple.
//! Every call goes through `spawn_blocking` so the rusqlite work never
//! blocks the tokio runtime.

use super::{
    ListObjectsQuery, MetadataError, MetadataStore, ObjectListing, PartListing, UploadListing,
};
use crate::types::{
    BucketRecord, Credential, MultipartUploadRecord, ObjectRecord, PartRecord, MAX_LIST_KEYS,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS buckets (
    name          TEXT PRIMARY KEY,
    region        TEXT NOT NULL,
    owner_id      TEXT NOT NULL,
    owner_display TEXT NOT NULL,
    acl           TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS objects (
    bucket              TEXT NOT NULL,
    key                 TEXT NOT NULL,
    size                INTEGER NOT NULL,
    etag                TEXT NOT NULL,
    content_type        TEXT NOT NULL,
    content_encoding    TEXT,
    content_language    TEXT,
    content_disposition TEXT,
    cache_control       TEXT,
    expires             TEXT,
    storage_class       TEXT NOT NULL,
    acl                 TEXT NOT NULL,
    user_metadata       TEXT NOT NULL,
    last_modified       TEXT NOT NULL,
    PRIMARY KEY (bucket, key)
);

CREATE TABLE IF NOT EXISTS multipart_uploads (
    upload_id           TEXT PRIMARY KEY,
    bucket              TEXT NOT NULL,
    key                 TEXT NOT NULL,
    content_type        TEXT NOT NULL,
    content_encoding    TEXT,
    content_language    TEXT,
    content_disposition TEXT,
    cache_control       TEXT,
    expires             TEXT,
    storage_class       TEXT NOT NULL,
    acl                 TEXT NOT NULL,
    user_metadata       TEXT NOT NULL,
    owner_id            TEXT NOT NULL,
    owner_display       TEXT NOT NULL,
    initiated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS parts (
    upload_id     TEXT NOT NULL,
    part_number   INTEGER NOT NULL,
    size          INTEGER NOT NULL,
    etag          TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    PRIMARY KEY (upload_id, part_number),
    FOREIGN KEY (upload_id) REFERENCES multipart_uploads(upload_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS credentials (
    access_key_id TEXT PRIMARY KEY,
    secret_key    TEXT NOT NULL,
    owner_id      TEXT NOT NULL,
    display_name  TEXT NOT NULL,
    active        INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_uploads_bucket_key ON multipart_uploads(bucket, key, upload_id);
";

/// SQLite implementation of [`MetadataStore`].
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Open (or create) the metadata database at `path`.
    /// Pass `":memory:"` for an ephemeral store in tests.
    pub fn open(path: &str) -> Result<Self, MetadataError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        debug!("Opened metadata store at {path}");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, MetadataError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, MetadataError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut conn.lock()))
            .await
            .map_err(|e| MetadataError::Other(format!("spawn_blocking join failed: {e}")))?
    }
}

// === Row mapping helpers ===

fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn ts_from_sql(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn meta_to_sql(meta: &HashMap<String, String>) -> Result<String, MetadataError> {
    Ok(serde_json::to_string(meta)?)
}

fn meta_from_sql(s: &str) -> HashMap<String, String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn bucket_from_row(row: &Row<'_>) -> rusqlite::Result<BucketRecord> {
    Ok(BucketRecord {
        name: row.get(0)?,
        region: row.get(1)?,
        owner_id: row.get(2)?,
        owner_display: row.get(3)?,
        acl: row.get(4)?,
        created_at: ts_from_sql(&row.get::<_, String>(5)?),
    })
}

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<ObjectRecord> {
    Ok(ObjectRecord {
        bucket: row.get(0)?,
        key: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        etag: row.get(3)?,
        content_type: row.get(4)?,
        content_encoding: row.get(5)?,
        content_language: row.get(6)?,
        content_disposition: row.get(7)?,
        cache_control: row.get(8)?,
        expires: row.get(9)?,
        storage_class: row.get(10)?,
        acl: row.get(11)?,
        user_metadata: meta_from_sql(&row.get::<_, String>(12)?),
        last_modified: ts_from_sql(&row.get::<_, String>(13)?),
    })
}

fn upload_from_row(row: &Row<'_>) -> rusqlite::Result<MultipartUploadRecord> {
    Ok(MultipartUploadRecord {
        upload_id: row.get(0)?,
        bucket: row.get(1)?,
        key: row.get(2)?,
        content_type: row.get(3)?,
        content_encoding: row.get(4)?,
        content_language: row.get(5)?,
        content_disposition: row.get(6)?,
        cache_control: row.get(7)?,
        expires: row.get(8)?,
        storage_class: row.get(9)?,
        acl: row.get(10)?,
        user_metadata: meta_from_sql(&row.get::<_, String>(11)?),
        owner_id: row.get(12)?,
        owner_display: row.get(13)?,
        initiated_at: ts_from_sql(&row.get::<_, String>(14)?),
    })
}

fn part_from_row(row: &Row<'_>) -> rusqlite::Result<PartRecord> {
    Ok(PartRecord {
        part_number: row.get::<_, i64>(0)? as u32,
        size: row.get::<_, i64>(1)? as u64,
        etag: row.get(2)?,
        last_modified: ts_from_sql(&row.get::<_, String>(3)?),
    })
}

const OBJECT_COLS: &str = "bucket, key, size, etag, content_type, content_encoding, \
     content_language, content_disposition, cache_control, expires, storage_class, acl, \
     user_metadata, last_modified";

const UPLOAD_COLS: &str = "upload_id, bucket, key, content_type, content_encoding, \
     content_language, content_disposition, cache_control, expires, storage_class, acl, \
     user_metadata, owner_id, owner_display, initiated_at";

/// A string strictly greater than every string with the given prefix, or
/// `None` when no bound exists (empty prefix or all chars at char::MAX).
/// The range query still re-checks `starts_with`; this only prunes the scan.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = next_scalar(last) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Next Unicode scalar value after `c`, skipping the surrogate gap.
fn next_scalar(c: char) -> Option<char> {
    let mut code = c as u32 + 1;
    if (0xD800..=0xDFFF).contains(&code) {
        code = 0xE000;
    }
    char::from_u32(code)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    // === Bucket operations ===

    async fn create_bucket(&self, bucket: BucketRecord) -> Result<(), MetadataError> {
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO buckets (name, region, owner_id, owner_display, acl, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    bucket.name,
                    bucket.region,
                    bucket.owner_id,
                    bucket.owner_display,
                    bucket.acl,
                    ts_to_sql(&bucket.created_at),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => {
                    Err(MetadataError::BucketAlreadyExists(bucket.name))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_bucket(&self, name: &str) -> Result<Option<BucketRecord>, MetadataError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT name, region, owner_id, owner_display, acl, created_at
                 FROM buckets WHERE name = ?1",
                params![name],
                bucket_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool, MetadataError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM buckets WHERE name = ?1)",
                params![name],
                |row| row.get::<_, bool>(0),
            )
            .map_err(Into::into)
        })
        .await
    }

    async fn list_buckets(&self) -> Result<Vec<BucketRecord>, MetadataError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, region, owner_id, owner_display, acl, created_at
                 FROM buckets ORDER BY name",
            )?;
            let rows = stmt.query_map([], bucket_from_row)?;
            let mut buckets = Vec::new();
            for row in rows {
                buckets.push(row?);
            }
            Ok(buckets)
        })
        .await
    }

    async fn update_bucket_acl(&self, name: &str, acl: &str) -> Result<(), MetadataError> {
        let name = name.to_string();
        let acl = acl.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE buckets SET acl = ?2 WHERE name = ?1",
                params![name, acl],
            )?;
            if changed == 0 {
                return Err(MetadataError::BucketNotFound(name));
            }
            Ok(())
        })
        .await
    }

    async fn delete_bucket(&self, name: &str) -> Result<(), MetadataError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let has_objects: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM objects WHERE bucket = ?1)",
                params![name],
                |row| row.get(0),
            )?;
            let has_uploads: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM multipart_uploads WHERE bucket = ?1)",
                params![name],
                |row| row.get(0),
            )?;
            if has_objects || has_uploads {
                return Err(MetadataError::BucketNotEmpty(name));
            }
            let deleted = tx.execute("DELETE FROM buckets WHERE name = ?1", params![name])?;
            if deleted == 0 {
                return Err(MetadataError::BucketNotFound(name));
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // === Credential operations ===

    async fn put_credential(&self, credential: Credential) -> Result<(), MetadataError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO credentials
                 (access_key_id, secret_key, owner_id, display_name, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    credential.access_key_id,
                    credential.secret_key,
                    credential.owner_id,
                    credential.display_name,
                    credential.active,
                    ts_to_sql(&credential.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_credential(
        &self,
        access_key_id: &str,
    ) -> Result<Option<Credential>, MetadataError> {
        let access_key_id = access_key_id.to_string();
        self.with_conn(move |conn| {
            let cred = conn
                .query_row(
                    "SELECT access_key_id, secret_key, owner_id, display_name, active, created_at
                     FROM credentials WHERE access_key_id = ?1",
                    params![access_key_id],
                    |row| {
                        Ok(Credential {
                            access_key_id: row.get(0)?,
                            secret_key: row.get(1)?,
                            owner_id: row.get(2)?,
                            display_name: row.get(3)?,
                            active: row.get(4)?,
                            created_at: ts_from_sql(&row.get::<_, String>(5)?),
                        })
                    },
                )
                .optional()?;
            // Inactive credentials are indistinguishable from absent ones.
            Ok(cred.filter(|c| c.active))
        })
        .await
    }

    // === Object operations ===

    async fn put_object(&self, object: ObjectRecord) -> Result<(), MetadataError> {
        self.with_conn(move |conn| {
            let meta = meta_to_sql(&object.user_metadata)?;
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO objects ({OBJECT_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    object.bucket,
                    object.key,
                    object.size as i64,
                    object.etag,
                    object.content_type,
                    object.content_encoding,
                    object.content_language,
                    object.content_disposition,
                    object.cache_control,
                    object.expires,
                    object.storage_class,
                    object.acl,
                    meta,
                    ts_to_sql(&object.last_modified),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectRecord>, MetadataError> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {OBJECT_COLS} FROM objects WHERE bucket = ?1 AND key = ?2"),
                params![bucket, key],
                object_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), MetadataError> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM objects WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), MetadataError> {
        let bucket = bucket.to_string();
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM objects WHERE bucket = ?1 AND key = ?2")?;
                for key in &keys {
                    stmt.execute(params![bucket, key])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_object_acl(
        &self,
        bucket: &str,
        key: &str,
        acl: &str,
    ) -> Result<(), MetadataError> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let acl = acl.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE objects SET acl = ?3 WHERE bucket = ?1 AND key = ?2",
                params![bucket, key, acl],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        query: &ListObjectsQuery,
    ) -> Result<ObjectListing, MetadataError> {
        let bucket = bucket.to_string();
        let query = query.clone();
        self.with_conn(move |conn| list_objects_sync(conn, &bucket, &query)).await
    }

    // === Multipart operations ===

    async fn create_multipart_upload(
        &self,
        upload: MultipartUploadRecord,
    ) -> Result<(), MetadataError> {
        self.with_conn(move |conn| {
            let meta = meta_to_sql(&upload.user_metadata)?;
            conn.execute(
                &format!(
                    "INSERT INTO multipart_uploads ({UPLOAD_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    upload.upload_id,
                    upload.bucket,
                    upload.key,
                    upload.content_type,
                    upload.content_encoding,
                    upload.content_language,
                    upload.content_disposition,
                    upload.cache_control,
                    upload.expires,
                    upload.storage_class,
                    upload.acl,
                    meta,
                    upload.owner_id,
                    upload.owner_display,
                    ts_to_sql(&upload.initiated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Result<Option<MultipartUploadRecord>, MetadataError> {
        let upload_id = upload_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {UPLOAD_COLS} FROM multipart_uploads WHERE upload_id = ?1"),
                params![upload_id],
                upload_from_row,
            )
            .optional()
            .map_err(Into::into)
        })
        .await
    }

    async fn put_part(&self, upload_id: &str, part: PartRecord) -> Result<(), MetadataError> {
        let upload_id = upload_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO parts
                 (upload_id, part_number, size, etag, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    upload_id,
                    part.part_number as i64,
                    part.size as i64,
                    part.etag,
                    ts_to_sql(&part.last_modified),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_parts_for_completion(
        &self,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<Vec<PartRecord>, MetadataError> {
        let upload_id = upload_id.to_string();
        let part_numbers = part_numbers.to_vec();
        self.with_conn(move |conn| {
            if part_numbers.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; part_numbers.len()].join(", ");
            let sql = format!(
                "SELECT part_number, size, etag, last_modified FROM parts
                 WHERE upload_id = ? AND part_number IN ({placeholders})
                 ORDER BY part_number"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(upload_id)];
            for pn in &part_numbers {
                values.push(Box::new(*pn as i64));
            }
            let rows = stmt.query_map(
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                part_from_row,
            )?;
            let mut parts = Vec::new();
            for row in rows {
                parts.push(row?);
            }
            Ok(parts)
        })
        .await
    }

    async fn list_parts(
        &self,
        upload_id: &str,
        max_parts: u32,
        part_number_marker: u32,
    ) -> Result<PartListing, MetadataError> {
        let upload_id = upload_id.to_string();
        let max_parts = max_parts.min(MAX_LIST_KEYS);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT part_number, size, etag, last_modified FROM parts
                 WHERE upload_id = ?1 AND part_number > ?2
                 ORDER BY part_number LIMIT ?3",
            )?;
            let rows = stmt.query_map(
                params![upload_id, part_number_marker as i64, max_parts as i64 + 1],
                part_from_row,
            )?;
            let mut parts = Vec::new();
            for row in rows {
                parts.push(row?);
            }
            let is_truncated = parts.len() > max_parts as usize;
            if is_truncated {
                parts.truncate(max_parts as usize);
            }
            let next_part_number_marker = if is_truncated {
                parts.last().map(|p| p.part_number)
            } else {
                None
            };
            Ok(PartListing {
                parts,
                is_truncated,
                next_part_number_marker,
            })
        })
        .await
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> Result<UploadListing, MetadataError> {
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        let key_marker = key_marker.to_string();
        let upload_id_marker = upload_id_marker.to_string();
        let max_uploads = max_uploads.min(MAX_LIST_KEYS);
        self.with_conn(move |conn| {
            let upper = prefix_upper_bound(&prefix);
            let sql = format!(
                "SELECT {UPLOAD_COLS} FROM multipart_uploads
                 WHERE bucket = ?1 AND key >= ?2 {upper_clause}
                   AND (key > ?3 OR (key = ?3 AND upload_id > ?4))
                 ORDER BY key, upload_id",
                upper_clause = if upper.is_some() { "AND key < ?5" } else { "" },
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = match &upper {
                Some(bound) => {
                    stmt.query(params![bucket, prefix, key_marker, upload_id_marker, bound])?
                }
                None => stmt.query(params![bucket, prefix, key_marker, upload_id_marker])?,
            };

            let mut listing = UploadListing::default();
            while let Some(row) = rows.next()? {
                let upload = upload_from_row(row)?;
                // The SQL range is a pruning bound, not an exact prefix filter.
                if !upload.key.starts_with(&prefix) {
                    continue;
                }
                if listing.uploads.len() == max_uploads as usize {
                    listing.is_truncated = true;
                    break;
                }
                listing.uploads.push(upload);
            }
            if listing.is_truncated {
                if let Some(last) = listing.uploads.last() {
                    listing.next_key_marker = Some(last.key.clone());
                    listing.next_upload_id_marker = Some(last.upload_id.clone());
                }
            }
            Ok(listing)
        })
        .await
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        object: ObjectRecord,
    ) -> Result<(), MetadataError> {
        let upload_id = upload_id.to_string();
        self.with_conn(move |conn| {
            let meta = meta_to_sql(&object.user_metadata)?;
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO objects ({OBJECT_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    object.bucket,
                    object.key,
                    object.size as i64,
                    object.etag,
                    object.content_type,
                    object.content_encoding,
                    object.content_language,
                    object.content_disposition,
                    object.cache_control,
                    object.expires,
                    object.storage_class,
                    object.acl,
                    meta,
                    ts_to_sql(&object.last_modified),
                ],
            )?;
            tx.execute("DELETE FROM parts WHERE upload_id = ?1", params![upload_id])?;
            tx.execute(
                "DELETE FROM multipart_uploads WHERE upload_id = ?1",
                params![upload_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<(), MetadataError> {
        let upload_id = upload_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM parts WHERE upload_id = ?1", params![upload_id])?;
            tx.execute(
                "DELETE FROM multipart_uploads WHERE upload_id = ?1",
                params![upload_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

/// Single-pass listing scan: enumerate keys in lexicographic order, fold
/// delimiter groups into common prefixes, stop once `max_keys` entries are
/// out and one more would follow (that makes the result truncated).
fn list_objects_sync(
    conn: &mut Connection,
    bucket: &str,
    query: &ListObjectsQuery,
) -> Result<ObjectListing, MetadataError> {
    let max_keys = query.max_keys.min(MAX_LIST_KEYS) as usize;
    if max_keys == 0 {
        return Ok(ObjectListing::default());
    }

    let upper = prefix_upper_bound(&query.prefix);
    let sql = format!(
        "SELECT {OBJECT_COLS} FROM objects
         WHERE bucket = ?1 AND key >= ?2 AND key > ?3 {upper_clause}
         ORDER BY key",
        upper_clause = if upper.is_some() { "AND key < ?4" } else { "" },
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = match &upper {
        Some(bound) => stmt.query(params![bucket, query.prefix, query.start_after, bound])?,
        None => stmt.query(params![bucket, query.prefix, query.start_after])?,
    };

    let mut listing = ObjectListing::default();
    let mut last_common_prefix: Option<String> = None;
    let mut last_emitted: Option<String> = None;
    let mut count = 0usize;

    while let Some(row) = rows.next()? {
        let object = object_from_row(row)?;

        // The SQL range is a pruning bound, not an exact prefix filter.
        if !object.key.starts_with(&query.prefix) {
            continue;
        }

        // Delimiter folding: a key whose remainder (after the prefix)
        // contains the delimiter collapses into one common prefix entry.
        if !query.delimiter.is_empty() {
            let remainder = &object.key[query.prefix.len()..];
            if let Some(idx) = remainder.find(&query.delimiter) {
                let common =
                    format!("{}{}", query.prefix, &remainder[..idx + query.delimiter.len()]);
                // Keys are sorted, so repeats of the same group are adjacent.
                if last_common_prefix.as_deref() == Some(common.as_str()) {
                    continue;
                }
                if count == max_keys {
                    listing.is_truncated = true;
                    break;
                }
                last_common_prefix = Some(common.clone());
                last_emitted = Some(common.clone());
                listing.common_prefixes.push(common);
                count += 1;
                continue;
            }
        }

        if count == max_keys {
            listing.is_truncated = true;
            break;
        }
        last_emitted = Some(object.key.clone());
        listing.objects.push(object);
        count += 1;
    }

    if listing.is_truncated {
        listing.next_marker = last_emitted;
    }
    Ok(listing)
}
