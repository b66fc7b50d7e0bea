//! S3 XML response builders and request-body parsers
//!
//! Responses go through a small [`XmlWriter`]: the S3 dialect cares about
//! element order and namespacing, so every builder states its layout
//! explicitly instead of handing control to a serializer. Request bodies
//! are parsed with quick-xml.

use crate::types::{BucketRecord, MultipartUploadRecord, ObjectRecord, PartRecord};
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Escape special XML characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// S3 timestamp format: ISO 8601 with milliseconds.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

// ============================================================================
// Response writer
// ============================================================================

/// Two-space-indented writer for the S3 response documents. Field values
/// pass through [`escape_xml`]; pre-encoded values (URL-encoded keys,
/// formatted timestamps) go in via [`XmlWriter::raw`].
struct XmlWriter {
    buf: String,
    depth: usize,
}

impl XmlWriter {
    /// Start a document: XML declaration plus the namespaced root element.
    fn root(element: &str) -> Self {
        let mut writer = Self {
            buf: String::with_capacity(256),
            depth: 1,
        };
        writer.buf.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        writer.buf.push('\n');
        writer.buf.push_str(&format!("<{element} xmlns=\"{S3_XMLNS}\">\n"));
        writer
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
    }

    /// `<name>` on its own line; children land one level deeper.
    fn open(&mut self, name: &str) {
        self.indent();
        self.buf.push_str(&format!("<{name}>\n"));
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth -= 1;
        self.indent();
        self.buf.push_str(&format!("</{name}>\n"));
    }

    /// `<name>value</name>` with the value escaped.
    fn field(&mut self, name: &str, value: &str) {
        let escaped = escape_xml(value);
        self.raw(name, &escaped);
    }

    /// `<name>value</name>` with a value that is already wire-safe.
    fn raw(&mut self, name: &str, value: &str) {
        self.indent();
        self.buf.push_str(&format!("<{name}>{value}</{name}>\n"));
    }

    /// Emit the field only when a value is present.
    fn field_opt(&mut self, name: &str, value: Option<&str>) {
        if let Some(v) = value {
            self.field(name, v);
        }
    }

    /// Numbers and booleans, rendered through Display.
    fn display(&mut self, name: &str, value: impl std::fmt::Display) {
        let rendered = value.to_string();
        self.raw(name, &rendered);
    }

    /// `<Owner>` block shared by several listings.
    fn owner(&mut self, id: &str, display_name: &str) {
        self.open("Owner");
        self.field("ID", id);
        self.field("DisplayName", display_name);
        self.close("Owner");
    }

    /// Close the root and hand back the document.
    fn finish(mut self, element: &str) -> String {
        self.buf.push_str(&format!("</{element}>"));
        self.buf
    }
}

// ============================================================================
// ListBuckets
// ============================================================================

/// ListBuckets response, rendered straight from the stored bucket rows.
#[derive(Debug)]
pub struct ListBucketsResult<'a> {
    pub owner_id: &'a str,
    pub owner_display_name: &'a str,
    pub buckets: &'a [BucketRecord],
}

impl ListBucketsResult<'_> {
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::root("ListAllMyBucketsResult");
        w.owner(self.owner_id, self.owner_display_name);
        w.open("Buckets");
        for bucket in self.buckets {
            w.open("Bucket");
            w.field("Name", &bucket.name);
            w.raw("CreationDate", &format_ts(&bucket.created_at));
            w.close("Bucket");
        }
        w.close("Buckets");
        w.finish("ListAllMyBucketsResult")
    }
}

// ============================================================================
// GetBucketLocation
// ============================================================================

/// GetBucketLocation response. `us-east-1` renders as the empty constraint,
/// matching AWS behaviour.
pub fn location_constraint_xml(region: &str) -> String {
    let inner = if region == "us-east-1" {
        String::new()
    } else {
        escape_xml(region)
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<LocationConstraint xmlns="{S3_XMLNS}">{inner}</LocationConstraint>"#
    )
}

// ============================================================================
// ListObjects v1/v2
// ============================================================================

/// Marker scheme distinguishing the two ListObjects generations. The two
/// versions differ only in their pagination vocabulary; the key/prefix
/// payload is identical.
#[derive(Debug, Clone)]
pub enum ListPagination {
    /// V1 echoes `Marker` and, when truncated, `NextMarker`.
    V1 {
        marker: String,
        next_marker: Option<String>,
    },
    /// V2 reports a `KeyCount` and the continuation-token pair, echoing
    /// `StartAfter` when the caller supplied it.
    V2 {
        continuation_token: Option<String>,
        next_continuation_token: Option<String>,
        start_after: Option<String>,
    },
}

/// ListObjects response (both generations).
#[derive(Debug, Clone)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: u32,
    pub is_truncated: bool,
    /// `url` requests URL-encoded keys and prefixes in the response.
    pub encoding_type: Option<String>,
    pub contents: Vec<ObjectRecord>,
    pub common_prefixes: Vec<String>,
    pub pagination: ListPagination,
}

impl ListBucketResult {
    /// Keys, prefixes, and markers honour the requested encoding-type;
    /// everything else is plain XML-escaped text.
    fn encode_key(&self, s: &str) -> String {
        if self.encoding_type.as_deref() == Some("url") {
            urlencoding::encode(s).into_owned()
        } else {
            escape_xml(s)
        }
    }

    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::root("ListBucketResult");
        w.field("Name", &self.name);
        let prefix = self.encode_key(&self.prefix);
        w.raw("Prefix", &prefix);
        w.field_opt("Delimiter", self.delimiter.as_deref());
        w.field_opt("EncodingType", self.encoding_type.as_deref());
        w.display("MaxKeys", self.max_keys);

        match &self.pagination {
            ListPagination::V1 {
                marker,
                next_marker,
            } => {
                let marker = self.encode_key(marker);
                w.raw("Marker", &marker);
                w.display("IsTruncated", self.is_truncated);
                if let Some(next) = next_marker {
                    let next = self.encode_key(next);
                    w.raw("NextMarker", &next);
                }
            }
            ListPagination::V2 {
                continuation_token,
                next_continuation_token,
                start_after,
            } => {
                let key_count = self.contents.len() + self.common_prefixes.len();
                w.display("KeyCount", key_count);
                w.display("IsTruncated", self.is_truncated);
                w.field_opt("ContinuationToken", continuation_token.as_deref());
                w.field_opt(
                    "NextContinuationToken",
                    next_continuation_token.as_deref(),
                );
                if let Some(start_after) = start_after {
                    let start_after = self.encode_key(start_after);
                    w.raw("StartAfter", &start_after);
                }
            }
        }

        for object in &self.contents {
            w.open("Contents");
            let key = self.encode_key(&object.key);
            w.raw("Key", &key);
            w.raw("LastModified", &format_ts(&object.last_modified));
            w.field("ETag", &object.etag);
            w.display("Size", object.size);
            w.field("StorageClass", &object.storage_class);
            w.close("Contents");
        }

        for common in &self.common_prefixes {
            w.open("CommonPrefixes");
            let common = self.encode_key(common);
            w.raw("Prefix", &common);
            w.close("CommonPrefixes");
        }

        w.finish("ListBucketResult")
    }
}

// ============================================================================
// DeleteObjects Request/Response
// ============================================================================

/// Delete request object
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
}

/// Delete request body
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "Quiet")]
    pub quiet: Option<bool>,
    #[serde(rename = "Object", default)]
    pub objects: Vec<DeleteObjectIdentifier>,
}

impl DeleteRequest {
    /// Parse from XML body
    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

/// Error deleting a single object
#[derive(Debug, Clone)]
pub struct DeleteError {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// DeleteObjects response
#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteError>,
}

impl DeleteResult {
    /// Quiet mode suppresses the per-key success entries; errors render
    /// either way.
    pub fn to_xml(&self, quiet: bool) -> String {
        let mut w = XmlWriter::root("DeleteResult");
        if !quiet {
            for key in &self.deleted {
                w.open("Deleted");
                w.field("Key", key);
                w.close("Deleted");
            }
        }
        for error in &self.errors {
            w.open("Error");
            w.field("Key", &error.key);
            w.field("Code", &error.code);
            w.field("Message", &error.message);
            w.close("Error");
        }
        w.finish("DeleteResult")
    }
}

// ============================================================================
// CopyObject / UploadPartCopy
// ============================================================================

/// Result body shared by CopyObject and UploadPartCopy; the destination
/// digest and write time under two different root elements.
#[derive(Debug, Clone)]
pub struct CopyObjectResult {
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

impl CopyObjectResult {
    fn render(&self, root: &str) -> String {
        let mut w = XmlWriter::root(root);
        w.field("ETag", &self.etag);
        w.raw("LastModified", &format_ts(&self.last_modified));
        w.finish(root)
    }

    pub fn to_xml(&self) -> String {
        self.render("CopyObjectResult")
    }

    pub fn to_copy_part_xml(&self) -> String {
        self.render("CopyPartResult")
    }
}

// ============================================================================
// Multipart Upload Request/Response
// ============================================================================

/// Parse a `<CompleteMultipartUpload>` body into `(part_number, etag)` pairs.
/// An empty part list or any structural damage is `None` (MalformedXML).
pub fn parse_complete_multipart_upload(body: &[u8]) -> Option<Vec<(u32, String)>> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut parts: Vec<(u32, String)> = Vec::new();
    let mut current_part_number: Option<u32> = None;
    let mut current_etag: Option<String> = None;
    let mut in_part = false;
    let mut current_tag = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "Part" {
                    in_part = true;
                    current_part_number = None;
                    current_etag = None;
                } else if in_part {
                    current_tag = tag;
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_part {
                    let text = e.unescape().ok()?.to_string();
                    match current_tag.as_str() {
                        "PartNumber" => current_part_number = text.parse().ok(),
                        "ETag" => current_etag = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "Part" {
                    in_part = false;
                    parts.push((current_part_number?, current_etag.take()?));
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }

    if parts.is_empty() {
        return None;
    }
    Some(parts)
}

/// InitiateMultipartUpload response
#[derive(Debug, Clone)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

impl InitiateMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::root("InitiateMultipartUploadResult");
        w.field("Bucket", &self.bucket);
        w.field("Key", &self.key);
        w.field("UploadId", &self.upload_id);
        w.finish("InitiateMultipartUploadResult")
    }
}

/// CompleteMultipartUpload response
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadResult {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

impl CompleteMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::root("CompleteMultipartUploadResult");
        w.field("Location", &self.location);
        w.field("Bucket", &self.bucket);
        w.field("Key", &self.key);
        w.field("ETag", &self.etag);
        w.finish("CompleteMultipartUploadResult")
    }
}

/// ListParts response
#[derive(Debug, Clone)]
pub struct ListPartsResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub owner_id: String,
    pub owner_display: String,
    pub storage_class: String,
    pub part_number_marker: u32,
    pub next_part_number_marker: Option<u32>,
    pub max_parts: u32,
    pub is_truncated: bool,
    pub parts: Vec<PartRecord>,
}

impl ListPartsResult {
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::root("ListPartsResult");
        w.field("Bucket", &self.bucket);
        w.field("Key", &self.key);
        w.field("UploadId", &self.upload_id);
        w.owner(&self.owner_id, &self.owner_display);
        w.field("StorageClass", &self.storage_class);
        w.display("PartNumberMarker", self.part_number_marker);
        if let Some(next) = self.next_part_number_marker {
            w.display("NextPartNumberMarker", next);
        }
        w.display("MaxParts", self.max_parts);
        w.display("IsTruncated", self.is_truncated);

        for part in &self.parts {
            w.open("Part");
            w.display("PartNumber", part.part_number);
            w.raw("LastModified", &format_ts(&part.last_modified));
            w.field("ETag", &part.etag);
            w.display("Size", part.size);
            w.close("Part");
        }

        w.finish("ListPartsResult")
    }
}

/// ListMultipartUploads response
#[derive(Debug, Clone)]
pub struct ListMultipartUploadsResult {
    pub bucket: String,
    pub prefix: String,
    pub key_marker: String,
    pub upload_id_marker: String,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
    pub max_uploads: u32,
    pub is_truncated: bool,
    pub uploads: Vec<MultipartUploadRecord>,
}

impl ListMultipartUploadsResult {
    pub fn to_xml(&self) -> String {
        let mut w = XmlWriter::root("ListMultipartUploadsResult");
        w.field("Bucket", &self.bucket);
        w.field("KeyMarker", &self.key_marker);
        w.field("UploadIdMarker", &self.upload_id_marker);
        w.field_opt("NextKeyMarker", self.next_key_marker.as_deref());
        w.field_opt(
            "NextUploadIdMarker",
            self.next_upload_id_marker.as_deref(),
        );
        if !self.prefix.is_empty() {
            w.field("Prefix", &self.prefix);
        }
        w.display("MaxUploads", self.max_uploads);
        w.display("IsTruncated", self.is_truncated);

        for upload in &self.uploads {
            w.open("Upload");
            w.field("Key", &upload.key);
            w.field("UploadId", &upload.upload_id);
            w.owner(&upload.owner_id, &upload.owner_display);
            w.field("StorageClass", &upload.storage_class);
            w.raw("Initiated", &format_ts(&upload.initiated_at));
            w.close("Upload");
        }

        w.finish("ListMultipartUploadsResult")
    }
}
