//! S3 API implementation

pub mod aws_chunked;
pub mod conditional;
pub mod errors;
pub mod handlers;
pub mod xml;

pub use errors::S3Error;
