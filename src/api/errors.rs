//! S3 error types and XML error envelopes
//!
//! Every failure below the dispatcher is a tagged [`S3Error`] kind; the
//! `IntoResponse` impl maps it to the wire envelope
//! `<Error><Code/><Message/><Resource/><RequestId/></Error>`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use rand::Rng;
use thiserror::Error;
use tracing::warn;

use crate::metadata::MetadataError;
use crate::storage::StorageError;

/// S3 API errors
#[derive(Debug, Clone, Error)]
pub enum S3Error {
    #[error("Access Denied: {0}")]
    AccessDenied(String),

    #[error("The AWS Access Key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    #[error("The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    #[error("The difference between the request time and the server's time is too large.")]
    RequestTimeTooSkewed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("The specified bucket does not exist.")]
    NoSuchBucket(String),

    #[error("The specified key does not exist.")]
    NoSuchKey(String),

    #[error("The specified multipart upload does not exist.")]
    NoSuchUpload(String),

    #[error("The requested bucket name is not available.")]
    BucketAlreadyExists(String),

    #[error("The bucket you tried to delete is not empty.")]
    BucketNotEmpty(String),

    #[error("The specified bucket is not valid: {0}")]
    InvalidBucketName(String),

    #[error("One or more of the specified parts could not be found. The part may not have been uploaded, or the specified entity tag may not match the part's entity tag.")]
    InvalidPart(String),

    #[error("The list of parts was not in ascending order. Parts must be ordered by part number.")]
    InvalidPartOrder,

    #[error("Your proposed upload is smaller than the minimum allowed size.")]
    EntityTooSmall,

    #[error("Your proposed upload exceeds the maximum allowed size.")]
    EntityTooLarge { size: u64, max: u64 },

    #[error("The requested range is not satisfiable.")]
    InvalidRange { total_size: u64 },

    #[error("At least one of the preconditions you specified did not hold.")]
    PreconditionFailed,

    /// Pseudo-error: conditional GET/HEAD short-circuit, not a fault.
    #[error("Not modified")]
    NotModified { etag: String, last_modified: String },

    #[error("The XML you provided was not well-formed or did not validate against our published schema.")]
    MalformedXML,

    #[error("The Content-MD5 you specified did not match what we received.")]
    BadDigest,

    #[error("The Content-MD5 you specified is not valid.")]
    InvalidDigest,

    #[error("Your key is too long.")]
    KeyTooLong,

    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    #[error("A header you provided implies functionality that is not implemented.")]
    NotImplemented,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl S3Error {
    /// Wire-level S3 error code.
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::AccessDenied(_) => "AccessDenied",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::BucketAlreadyExists(_) => "BucketAlreadyExists",
            S3Error::BucketNotEmpty(_) => "BucketNotEmpty",
            S3Error::InvalidBucketName(_) => "InvalidBucketName",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::EntityTooSmall => "EntityTooSmall",
            S3Error::EntityTooLarge { .. } => "EntityTooLarge",
            S3Error::InvalidRange { .. } => "InvalidRange",
            S3Error::PreconditionFailed => "PreconditionFailed",
            S3Error::NotModified { .. } => "NotModified",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::BadDigest => "BadDigest",
            S3Error::InvalidDigest => "InvalidDigest",
            S3Error::KeyTooLong => "KeyTooLongError",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// HTTP status code for the envelope.
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::AccessDenied(_)
            | S3Error::InvalidAccessKeyId
            | S3Error::SignatureDoesNotMatch
            | S3Error::RequestTimeTooSkewed => StatusCode::FORBIDDEN,
            S3Error::InvalidArgument(_)
            | S3Error::InvalidBucketName(_)
            | S3Error::InvalidPart(_)
            | S3Error::InvalidPartOrder
            | S3Error::EntityTooSmall
            | S3Error::EntityTooLarge { .. }
            | S3Error::MalformedXML
            | S3Error::BadDigest
            | S3Error::InvalidDigest
            | S3Error::KeyTooLong => StatusCode::BAD_REQUEST,
            S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) | S3Error::NoSuchUpload(_) => {
                StatusCode::NOT_FOUND
            }
            S3Error::BucketAlreadyExists(_) | S3Error::BucketNotEmpty(_) => StatusCode::CONFLICT,
            S3Error::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            S3Error::NotModified { .. } => StatusCode::NOT_MODIFIED,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `<Resource>` element, where the kind names one.
    fn resource(&self) -> &str {
        match self {
            S3Error::NoSuchKey(key) => key,
            S3Error::NoSuchBucket(bucket)
            | S3Error::BucketAlreadyExists(bucket)
            | S3Error::BucketNotEmpty(bucket) => bucket,
            S3Error::NoSuchUpload(upload_id) => upload_id,
            _ => "",
        }
    }

    /// Generate the XML error envelope.
    pub fn to_xml(&self, request_id: &str) -> String {
        // Never leak internal detail to the wire; it is logged instead.
        let message = match self {
            S3Error::InternalError(_) => {
                "We encountered an internal error. Please try again.".to_string()
            }
            other => other.to_string(),
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
    <RequestId>{}</RequestId>
</Error>"#,
            self.code(),
            crate::api::xml::escape_xml(&message),
            crate::api::xml::escape_xml(self.resource()),
            request_id,
        )
    }
}

/// Generate a request id: 16 uppercase hex characters.
pub fn generate_request_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| {
            let v: u8 = rng.gen_range(0..16);
            char::from_digit(v as u32, 16)
                .unwrap_or('0')
                .to_ascii_uppercase()
        })
        .collect()
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        // The 304 short-circuit carries validators, no body.
        if let S3Error::NotModified {
            etag,
            last_modified,
        } = &self
        {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            if let Ok(v) = HeaderValue::from_str(etag) {
                response.headers_mut().insert(header::ETAG, v);
            }
            if let Ok(v) = HeaderValue::from_str(last_modified) {
                response.headers_mut().insert(header::LAST_MODIFIED, v);
            }
            return response;
        }

        if let S3Error::InternalError(detail) = &self {
            warn!("Internal error surfaced to client: {detail}");
        }

        let request_id = generate_request_id();
        let status = self.status_code();
        let body = self.to_xml(&request_id);

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "application/xml")],
            body,
        )
            .into_response();
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-amz-request-id", v);
        }
        // 416 advertises the valid range span.
        if let S3Error::InvalidRange { total_size } = &self {
            if let Ok(v) = HeaderValue::from_str(&format!("bytes */{total_size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, v);
            }
        }
        response
    }
}

impl From<MetadataError> for S3Error {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::BucketAlreadyExists(name) => S3Error::BucketAlreadyExists(name),
            MetadataError::BucketNotFound(name) => S3Error::NoSuchBucket(name),
            MetadataError::BucketNotEmpty(name) => S3Error::BucketNotEmpty(name),
            other => S3Error::InternalError(other.to_string()),
        }
    }
}

impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => S3Error::NoSuchKey(key),
            StorageError::TooLarge { size, max } => S3Error::EntityTooLarge { size, max },
            StorageError::DigestMismatch => S3Error::BadDigest,
            other => S3Error::InternalError(other.to_string()),
        }
    }
}
