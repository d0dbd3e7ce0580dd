//! Backblaze B2 native API client.
//!
//! The account is authorized lazily and the token cached until the API
//! answers `401`, after which the next call re-authorizes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::RwLock;

use super::{MultipartSession, ObjectStorage, StorageError, StoredObject};
use crate::config::StorageConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Authorization {
    authorization_token: String,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrl {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileInfo {
    file_id: String,
    file_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartLargeFile<'a> {
    bucket_id: &'a str,
    file_name: &'a str,
    content_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinishLargeFile<'a> {
    file_id: &'a str,
    part_sha1_array: &'a [String],
}

/// B2 client bound to one bucket.
#[derive(Debug)]
pub struct B2Client {
    http: reqwest::Client,
    auth_url: String,
    key_id: String,
    application_key: String,
    bucket_id: String,
    auth: RwLock<Option<Authorization>>,
}

/// Lowercase hex SHA-1 of `data`, as B2 expects in checksum headers.
fn sha1_hex(data: &[u8]) -> String {
    format!("{:x}", Sha1::digest(data))
}

/// Percent-encodes a file name for the `X-Bz-File-Name` header.
fn encode_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(char::from(byte));
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Decodes a B2 error body.
async fn api_error(resp: reqwest::Response) -> StorageError {
    let status = resp.status();
    let body = resp.json::<ApiErrorBody>().await.unwrap_or(ApiErrorBody {
        code: String::new(),
        message: status.canonical_reason().unwrap_or("unknown").to_string(),
    });
    StorageError::Api {
        status: status.as_u16(),
        code: body.code,
        message: body.message,
    }
}

impl B2Client {
    /// Builds a client from configuration. No request is made until the
    /// first upload.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            auth_url: config.auth_url.clone(),
            key_id: config.key_id.clone(),
            application_key: config.application_key.clone(),
            bucket_id: config.bucket_id.clone(),
            auth: RwLock::new(None),
        })
    }

    async fn authorization(&self) -> Result<Authorization, StorageError> {
        if let Some(auth) = self.auth.read().await.as_ref() {
            return Ok(auth.clone());
        }
        let mut guard = self.auth.write().await;
        if let Some(auth) = guard.as_ref() {
            return Ok(auth.clone());
        }
        let resp = self
            .http
            .get(&self.auth_url)
            .basic_auth(&self.key_id, Some(&self.application_key))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        let auth: Authorization = resp.json().await?;
        tracing::debug!(api_url = %auth.api_url, "authorized storage account");
        *guard = Some(auth.clone());
        Ok(auth)
    }

    /// Maps error responses and drops the cached token on `401`.
    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            *self.auth.write().await = None;
        }
        Err(api_error(resp).await)
    }

    async fn call<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<R, StorageError> {
        let auth = self.authorization().await?;
        let resp = self
            .http
            .post(format!("{}/b2api/v2/{operation}", auth.api_url))
            .header(reqwest::header::AUTHORIZATION, auth.authorization_token)
            .json(body)
            .send()
            .await?;
        Ok(self.check(resp).await?.json().await?)
    }
}

#[async_trait]
impl ObjectStorage for B2Client {
    async fn start_multipart(
        &self,
        path: &str,
        content_type: &str,
    ) -> Result<MultipartSession, StorageError> {
        let info: FileInfo = self
            .call(
                "b2_start_large_file",
                &StartLargeFile {
                    bucket_id: &self.bucket_id,
                    file_name: path,
                    content_type,
                },
            )
            .await?;
        Ok(MultipartSession::new(info.file_id, info.file_name))
    }

    async fn upload_part(
        &self,
        session: &mut MultipartSession,
        data: Bytes,
    ) -> Result<(), StorageError> {
        let target: UploadUrl = self
            .call(
                "b2_get_upload_part_url",
                &serde_json::json!({ "fileId": session.file_id }),
            )
            .await?;
        let hash = sha1_hex(&data);
        let part_number = session.part_count() + 1;
        let resp = self
            .http
            .post(&target.upload_url)
            .header(reqwest::header::AUTHORIZATION, target.authorization_token)
            .header("X-Bz-Part-Number", part_number)
            .header("X-Bz-Content-Sha1", &hash)
            .header(reqwest::header::CONTENT_LENGTH, data.len())
            .body(data)
            .send()
            .await?;
        self.check(resp).await?;
        session.part_hashes.push(hash);
        tracing::debug!(file_id = %session.file_id, part_number, "uploaded part");
        Ok(())
    }

    async fn finish(&self, session: MultipartSession) -> Result<StoredObject, StorageError> {
        let info: FileInfo = self
            .call(
                "b2_finish_large_file",
                &FinishLargeFile {
                    file_id: &session.file_id,
                    part_sha1_array: &session.part_hashes,
                },
            )
            .await?;
        Ok(StoredObject {
            file_id: info.file_id,
            path: info.file_name,
        })
    }

    async fn cancel(&self, session: MultipartSession) -> Result<(), StorageError> {
        let _: serde_json::Value = self
            .call(
                "b2_cancel_large_file",
                &serde_json::json!({ "fileId": session.file_id }),
            )
            .await?;
        Ok(())
    }

    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<StoredObject, StorageError> {
        let target: UploadUrl = self
            .call(
                "b2_get_upload_url",
                &serde_json::json!({ "bucketId": self.bucket_id }),
            )
            .await?;
        let resp = self
            .http
            .post(&target.upload_url)
            .header(reqwest::header::AUTHORIZATION, target.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(path))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("X-Bz-Content-Sha1", sha1_hex(&data))
            .header(reqwest::header::CONTENT_LENGTH, data.len())
            .body(data)
            .send()
            .await?;
        let info: FileInfo = self.check(resp).await?.json().await?;
        Ok(StoredObject {
            file_id: info.file_id,
            path: info.file_name,
        })
    }
}
