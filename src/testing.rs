//! In-memory doubles of the external collaborators.
//!
//! Each fake records the name of every call in order so tests can assert
//! both how often and in which sequence the engine talked to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::control::token::IssuedToken;
use crate::control::{ByteStream, ControlError, GameServerControl, MatchRoster, TokenIssuer};
use crate::domain::{ServerId, ServerSettings, ServerState};
use crate::storage::{MultipartSession, ObjectStorage, StorageError, StoredObject};

/// Ordered call log.
#[derive(Debug, Default)]
pub struct CallLog(Mutex<Vec<&'static str>>);

impl CallLog {
    async fn push(&self, call: &'static str) {
        self.0.lock().await.push(call);
    }

    /// Every call so far, in order.
    pub async fn all(&self) -> Vec<&'static str> {
        self.0.lock().await.clone()
    }

    /// How often `call` happened.
    pub async fn count(&self, call: &str) -> usize {
        self.0.lock().await.iter().filter(|c| **c == call).count()
    }
}

/// Live state for a fake server.
pub fn server_state(id: &str, credits: f64) -> ServerState {
    ServerState {
        server_id: ServerId::new(id),
        raw_ip: "10.0.0.1".to_string(),
        game_port: 27015,
        month_credits: credits,
        month_reset_at: Utc::now() + Duration::days(20),
    }
}

/// Game-server control fake.
#[derive(Debug, Default)]
pub struct FakeControl {
    /// Call log.
    pub calls: CallLog,
    /// Known servers.
    pub servers: Mutex<HashMap<ServerId, ServerState>>,
    /// Files available for download, by path.
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    /// Console lines received.
    pub console: Mutex<Vec<String>>,
    /// Settings pushed.
    pub settings: Mutex<Vec<ServerSettings>>,
    /// Rosters configured.
    pub rosters: Mutex<Vec<MatchRoster>>,
    /// Address a server moves to once started.
    pub boot_address: Mutex<Option<(String, u16)>>,
    clones: AtomicUsize,
}

impl FakeControl {
    /// Registers a server.
    pub async fn add_server(&self, state: ServerState) {
        self.servers
            .lock()
            .await
            .insert(state.server_id.clone(), state);
    }

    /// Makes `path` downloadable.
    pub async fn add_file(&self, path: &str, data: Vec<u8>) {
        self.files.lock().await.insert(path.to_string(), data);
    }
}

#[async_trait]
impl GameServerControl for FakeControl {
    async fn get(&self, server_id: &ServerId) -> Result<ServerState, ControlError> {
        self.calls.push("get").await;
        self.servers
            .lock()
            .await
            .get(server_id)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(server_id.to_string()))
    }

    async fn update_settings(
        &self,
        _server_id: &ServerId,
        settings: &ServerSettings,
    ) -> Result<(), ControlError> {
        self.calls.push("update_settings").await;
        self.settings.lock().await.push(settings.clone());
        Ok(())
    }

    async fn duplicate(&self, template: &ServerId) -> Result<ServerState, ControlError> {
        self.calls.push("duplicate").await;
        let mut servers = self.servers.lock().await;
        if !servers.contains_key(template) {
            return Err(ControlError::NotFound(template.to_string()));
        }
        let n = self.clones.fetch_add(1, Ordering::SeqCst) + 1;
        let clone = server_state(&format!("clone-{n}"), 100.0);
        servers.insert(clone.server_id.clone(), clone.clone());
        Ok(clone)
    }

    async fn start(&self, server_id: &ServerId) -> Result<(), ControlError> {
        self.calls.push("start").await;
        if let Some((ip, port)) = self.boot_address.lock().await.clone()
            && let Some(state) = self.servers.lock().await.get_mut(server_id)
        {
            state.raw_ip = ip;
            state.game_port = port;
        }
        Ok(())
    }

    async fn stop(&self, _server_id: &ServerId) -> Result<(), ControlError> {
        self.calls.push("stop").await;
        Ok(())
    }

    async fn console(&self, _server_id: &ServerId, line: &str) -> Result<(), ControlError> {
        self.calls.push("console").await;
        self.console.lock().await.push(line.to_string());
        Ok(())
    }

    async fn create_match(
        &self,
        _server_id: &ServerId,
        roster: &MatchRoster,
    ) -> Result<(), ControlError> {
        self.calls.push("create_match").await;
        self.rosters.lock().await.push(roster.clone());
        Ok(())
    }

    async fn download(&self, _server_id: &ServerId, path: &str) -> Result<ByteStream, ControlError> {
        self.calls.push("download").await;
        let data = self
            .files
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(path.to_string()))?;
        let chunks: Vec<Result<Bytes, ControlError>> = data
            .chunks(64 * 1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

/// Token API fake issuing `token-N` / `token-id-N`.
#[derive(Debug, Default)]
pub struct FakeTokens {
    /// Call log.
    pub calls: CallLog,
    /// Revoked token ids.
    pub revoked: Mutex<Vec<String>>,
    issued: AtomicUsize,
}

#[async_trait]
impl TokenIssuer for FakeTokens {
    async fn issue(&self, _memo: &str) -> Result<IssuedToken, ControlError> {
        self.calls.push("issue").await;
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedToken {
            token: format!("token-{n}"),
            token_id: format!("token-id-{n}"),
        })
    }

    async fn revoke(&self, token_id: &str) -> Result<(), ControlError> {
        self.calls.push("revoke").await;
        self.revoked.lock().await.push(token_id.to_string());
        Ok(())
    }
}

/// Object storage fake keeping uploaded bytes in memory.
#[derive(Debug, Default)]
pub struct FakeStorage {
    /// Call log.
    pub calls: CallLog,
    /// Sizes of uploaded multipart parts, in order.
    pub part_sizes: Mutex<Vec<usize>>,
    /// Committed objects by path.
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    open: Mutex<HashMap<String, Vec<u8>>>,
    sessions: AtomicUsize,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn start_multipart(
        &self,
        path: &str,
        _content_type: &str,
    ) -> Result<MultipartSession, StorageError> {
        self.calls.push("start_multipart").await;
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let file_id = format!("large-{n}");
        self.open.lock().await.insert(file_id.clone(), Vec::new());
        Ok(MultipartSession::new(file_id, path))
    }

    async fn upload_part(
        &self,
        session: &mut MultipartSession,
        data: Bytes,
    ) -> Result<(), StorageError> {
        self.calls.push("upload_part").await;
        self.part_sizes.lock().await.push(data.len());
        if let Some(buffer) = self.open.lock().await.get_mut(&session.file_id) {
            buffer.extend_from_slice(&data);
        }
        session.part_hashes.push(format!("part-{}", session.part_count() + 1));
        Ok(())
    }

    async fn finish(&self, session: MultipartSession) -> Result<StoredObject, StorageError> {
        self.calls.push("finish").await;
        let data = self
            .open
            .lock()
            .await
            .remove(&session.file_id)
            .unwrap_or_default();
        self.objects.lock().await.insert(session.path.clone(), data);
        Ok(StoredObject {
            file_id: session.file_id,
            path: session.path,
        })
    }

    async fn cancel(&self, session: MultipartSession) -> Result<(), StorageError> {
        self.calls.push("cancel").await;
        self.open.lock().await.remove(&session.file_id);
        Ok(())
    }

    async fn upload(
        &self,
        path: &str,
        _content_type: &str,
        data: Bytes,
    ) -> Result<StoredObject, StorageError> {
        self.calls.push("upload").await;
        self.objects.lock().await.insert(path.to_string(), data.to_vec());
        Ok(StoredObject {
            file_id: format!("small-{path}"),
            path: path.to_string(),
        })
    }
}
