//! Object storage for archived demos.
//!
//! [`ObjectStorage`] exposes the multipart and single-shot upload
//! primitives the demo pipeline commits archives with.
//! [`b2::B2Client`] implements it against the Backblaze B2 native API.

pub mod b2;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

pub use b2::B2Client;

/// Errors returned by object storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Transport failure or timeout.
    #[error("request failed: {0}")]
    Http(String),

    /// The storage API rejected the request.
    #[error("storage api returned {status} ({code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider error code.
        code: String,
        /// Provider message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// An open multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    /// Provider id of the file being assembled.
    pub file_id: String,
    /// Destination path.
    pub path: String,
    /// Checksums of the parts uploaded so far, in order.
    pub part_hashes: Vec<String>,
}

impl MultipartSession {
    /// Starts tracking a session for `file_id`.
    #[must_use]
    pub fn new(file_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            path: path.into(),
            part_hashes: Vec::new(),
        }
    }

    /// Number of parts uploaded so far.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.part_hashes.len()
    }
}

/// A committed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Provider id of the object.
    pub file_id: String,
    /// Path the object was stored under.
    pub path: String,
}

/// Upload primitives of an object store.
#[async_trait]
pub trait ObjectStorage: Send + Sync + fmt::Debug {
    /// Opens a multipart upload to `path`.
    async fn start_multipart(
        &self,
        path: &str,
        content_type: &str,
    ) -> Result<MultipartSession, StorageError>;

    /// Appends the next part to an open session.
    async fn upload_part(
        &self,
        session: &mut MultipartSession,
        data: Bytes,
    ) -> Result<(), StorageError>;

    /// Commits an open session.
    async fn finish(&self, session: MultipartSession) -> Result<StoredObject, StorageError>;

    /// Discards an open session.
    async fn cancel(&self, session: MultipartSession) -> Result<(), StorageError>;

    /// Uploads a whole object in one request.
    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredObject, StorageError>;
}
