//! Demo capture: download, compress and archive a match recording.
//!
//! The recording is streamed from the game server through a
//! [`ZipStream`] and the compressed bytes are gathered by a
//! [`PartAccumulator`]. Every time the buffer reaches the part size it is
//! flushed as one multipart part. When the stream ends:
//!
//! | parts flushed | buffer    | action                                   |
//! |---------------|-----------|------------------------------------------|
//! | 0             | non-empty | cancel the session, single-shot upload    |
//! | ≥ 1           | non-empty | upload the remainder as the last part     |
//! | any           | empty     | finish the session with what was flushed  |

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;

use super::zip_stream::ZipStream;
use crate::config::DemoConfig;
use crate::control::{ControlError, ServerHandle};
use crate::domain::{DemoStatus, MatchId, MatchRef, MatchUpdate};
use crate::error::GatewayError;
use crate::persistence::MatchRepository;
use crate::storage::{MultipartSession, ObjectStorage, StoredObject};

/// Content type archives are stored with.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/octet-stream";

/// What is left once the compressed stream has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remainder {
    /// Nothing was flushed; upload these bytes in one request.
    Single(Bytes),
    /// Parts were flushed; upload these bytes as the last part.
    FinalPart(Bytes),
    /// The buffer is empty.
    Empty,
}

/// Buffers compressed output into multipart-sized parts.
#[derive(Debug)]
pub struct PartAccumulator {
    part_size: usize,
    buffer: Vec<u8>,
    parts_flushed: usize,
    total: u64,
}

impl PartAccumulator {
    /// Creates an accumulator flushing at `part_size` bytes.
    #[must_use]
    pub fn new(part_size: usize) -> Self {
        Self {
            part_size: part_size.max(1),
            buffer: Vec::new(),
            parts_flushed: 0,
            total: 0,
        }
    }

    /// Appends bytes and returns the buffer as a part once it reached the
    /// part size.
    pub fn push(&mut self, data: &[u8]) -> Option<Bytes> {
        self.buffer.extend_from_slice(data);
        self.total += data.len() as u64;
        if self.buffer.len() >= self.part_size {
            self.parts_flushed += 1;
            return Some(Bytes::from(std::mem::take(&mut self.buffer)));
        }
        None
    }

    /// Compressed bytes seen so far.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Parts returned by [`PartAccumulator::push`] so far.
    #[must_use]
    pub const fn parts_flushed(&self) -> usize {
        self.parts_flushed
    }

    /// Ends accumulation.
    #[must_use]
    pub fn finish(self) -> Remainder {
        if self.buffer.is_empty() {
            Remainder::Empty
        } else if self.parts_flushed == 0 {
            Remainder::Single(Bytes::from(self.buffer))
        } else {
            Remainder::FinalPart(Bytes::from(self.buffer))
        }
    }
}

/// Result of a capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemoOutcome {
    /// The archive was committed.
    Ready {
        /// Storage id of the archive.
        archive_id: String,
        /// Public download URL.
        demo_url: String,
    },
    /// The compressed demo exceeded the size cap and was discarded.
    TooLarge,
    /// The recording no longer exists on the server.
    Expired,
}

enum Capture {
    Committed(StoredObject),
    TooLarge(MultipartSession),
    Missing(MultipartSession),
}

/// Streams recordings from game servers into object storage.
#[derive(Debug, Clone)]
pub struct DemoPipeline {
    storage: Arc<dyn ObjectStorage>,
    matches: Arc<dyn MatchRepository>,
    config: DemoConfig,
    cdn_url: String,
}

impl DemoPipeline {
    /// Creates a pipeline. `cdn_url` must end with `/`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        matches: Arc<dyn MatchRepository>,
        config: DemoConfig,
        cdn_url: String,
    ) -> Self {
        Self {
            storage,
            matches,
            config,
            cdn_url,
        }
    }

    /// Public URL of a ready archive.
    #[must_use]
    pub fn demo_url(&self, match_ref: &MatchRef) -> String {
        format!(
            "{}{}",
            self.cdn_url,
            self.config.archive_path(match_ref.match_id)
        )
    }

    /// Captures the recording of `match_ref` from `server`.
    ///
    /// Marks the demo `Processing` first. A missing recording ends as
    /// `Expired` and an oversized one as `TooLarge`; both discard the
    /// open upload session.
    ///
    /// # Errors
    ///
    /// Control and storage failures are returned after the open session
    /// was cancelled; the demo status then stays `Processing`.
    pub async fn upload(
        &self,
        server: &ServerHandle,
        match_ref: &MatchRef,
    ) -> Result<DemoOutcome, GatewayError> {
        let match_id = match_ref.match_id;
        self.matches
            .update_match(match_ref, &MatchUpdate::demo_status(DemoStatus::Processing))
            .await?;

        let path = self.config.archive_path(match_id);
        let session = self
            .storage
            .start_multipart(&path, ARCHIVE_CONTENT_TYPE)
            .await?;
        let file_id = session.file_id.clone();

        let outcome = match self.capture(server, match_id, &path, session).await {
            Ok(Capture::Committed(stored)) => {
                let demo_url = self.demo_url(match_ref);
                self.matches
                    .update_match(
                        match_ref,
                        &MatchUpdate {
                            archive_id: Some(stored.file_id.clone()),
                            demo_status: Some(DemoStatus::Ready),
                            ..MatchUpdate::default()
                        },
                    )
                    .await?;
                tracing::info!(%match_id, archive_id = %stored.file_id, "demo archived");
                DemoOutcome::Ready {
                    archive_id: stored.file_id,
                    demo_url,
                }
            }
            Ok(Capture::TooLarge(session)) => {
                self.discard(session).await;
                self.matches
                    .update_match(match_ref, &MatchUpdate::demo_status(DemoStatus::TooLarge))
                    .await?;
                tracing::warn!(%match_id, max_bytes = ?self.config.max_bytes, "demo too large");
                DemoOutcome::TooLarge
            }
            Ok(Capture::Missing(session)) => {
                self.discard(session).await;
                self.matches
                    .update_match(match_ref, &MatchUpdate::demo_status(DemoStatus::Expired))
                    .await?;
                tracing::warn!(%match_id, "recording not found on server");
                DemoOutcome::Expired
            }
            Err((session, e)) => {
                if let Some(session) = session {
                    self.discard(session).await;
                }
                tracing::error!(%match_id, %file_id, error = %e, "demo capture failed");
                return Err(e);
            }
        };
        Ok(outcome)
    }

    async fn discard(&self, session: MultipartSession) {
        let file_id = session.file_id.clone();
        if let Err(e) = self.storage.cancel(session).await {
            tracing::warn!(%file_id, error = %e, "could not cancel upload session");
        }
    }

    /// Streams and commits the archive. On failure the session is handed
    /// back when it is still open.
    async fn capture(
        &self,
        server: &ServerHandle,
        match_id: MatchId,
        path: &str,
        mut session: MultipartSession,
    ) -> Result<Capture, (Option<MultipartSession>, GatewayError)> {
        let recording = self.config.recording_name(match_id);
        let mut stream = match server.download(&recording).await {
            Ok(stream) => stream,
            Err(ControlError::NotFound(_)) => return Ok(Capture::Missing(session)),
            Err(e) => return Err((Some(session), e.into())),
        };

        let mut zip = ZipStream::new(&recording, Utc::now());
        let mut parts = PartAccumulator::new(self.config.part_size);

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(ControlError::NotFound(_)) => return Ok(Capture::Missing(session)),
                Err(e) => return Err((Some(session), e.into())),
            };
            if let Err(e) = zip.write(&chunk) {
                return Err((Some(session), e));
            }
            let part = parts.push(&zip.take_output());
            if self.over_cap(&parts) {
                return Ok(Capture::TooLarge(session));
            }
            if let Some(part) = part
                && let Err(e) = self.storage.upload_part(&mut session, part).await
            {
                return Err((Some(session), e.into()));
            }
        }

        let tail = match zip.finish() {
            Ok(tail) => tail,
            Err(e) => return Err((Some(session), e)),
        };
        let part = parts.push(&tail);
        if self.over_cap(&parts) {
            return Ok(Capture::TooLarge(session));
        }
        if let Some(part) = part
            && let Err(e) = self.storage.upload_part(&mut session, part).await
        {
            return Err((Some(session), e.into()));
        }
        tracing::debug!(
            path,
            bytes = parts.total(),
            parts = parts.parts_flushed(),
            "demo compressed"
        );

        let stored = match parts.finish() {
            Remainder::Single(data) => {
                if let Err(e) = self.storage.cancel(session).await {
                    return Err((None, e.into()));
                }
                self.storage
                    .upload(path, ARCHIVE_CONTENT_TYPE, data)
                    .await
                    .map_err(|e| (None, e.into()))?
            }
            Remainder::FinalPart(data) => {
                if let Err(e) = self.storage.upload_part(&mut session, data).await {
                    return Err((Some(session), e.into()));
                }
                self.storage
                    .finish(session)
                    .await
                    .map_err(|e| (None, e.into()))?
            }
            Remainder::Empty => self
                .storage
                .finish(session)
                .await
                .map_err(|e| (None, e.into()))?,
        };
        Ok(Capture::Committed(stored))
    }

    fn over_cap(&self, parts: &PartAccumulator) -> bool {
        self.config
            .max_bytes
            .is_some_and(|max| parts.total() > max)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_DEMO_PART_SIZE;
    use crate::domain::{LeagueId, MatchReservation, ServerId, ServerRecord};
    use crate::persistence::{MemoryStore, ServerDirectory};
    use crate::testing::{FakeControl, FakeStorage, server_state};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn below_threshold_is_a_single_upload() {
        let mut acc = PartAccumulator::new(100);
        assert!(acc.push(&[0u8; 99]).is_none());
        assert!(matches!(acc.finish(), Remainder::Single(b) if b.len() == 99));
    }

    #[test]
    fn threshold_plus_one_flushes_one_part() {
        let mut acc = PartAccumulator::new(100);
        let Some(part) = acc.push(&[0u8; 101]) else {
            panic!("buffer at threshold should flush");
        };
        assert_eq!(part.len(), 101);
        assert_eq!(acc.parts_flushed(), 1);
        assert_eq!(acc.finish(), Remainder::Empty);
    }

    #[test]
    fn remainder_after_parts_is_final_part() {
        let mut acc = PartAccumulator::new(100);
        assert!(acc.push(&[0u8; 60]).is_none());
        assert!(acc.push(&[0u8; 60]).is_some());
        assert!(acc.push(&[0u8; 10]).is_none());
        assert_eq!(acc.total(), 130);
        assert!(matches!(acc.finish(), Remainder::FinalPart(b) if b.len() == 10));
    }

    fn demo_config(part_size: usize, max_bytes: Option<u64>) -> DemoConfig {
        DemoConfig {
            extension: ".dem".to_string(),
            compressed_extension: ".zip".to_string(),
            pathway: "demos".to_string(),
            part_size,
            max_bytes,
        }
    }

    struct Fixture {
        control: Arc<FakeControl>,
        storage: Arc<FakeStorage>,
        store: Arc<MemoryStore>,
        match_ref: MatchRef,
        handle: ServerHandle,
    }

    async fn fixture() -> Fixture {
        let control = Arc::new(FakeControl::default());
        control.add_server(server_state("srv", 10.0)).await;
        let storage = Arc::new(FakeStorage::default());
        let store = Arc::new(MemoryStore::new());
        store
            .insert_server(ServerRecord {
                server_id: ServerId::new("srv"),
                game_token: None,
                game_token_id: None,
                game_token_expires: Utc::now(),
                month_credits: 10.0,
                month_reset_at: Utc::now(),
            })
            .await;
        let reservation = MatchReservation {
            match_id: crate::domain::MatchId::new(),
            league_id: LeagueId::new("lg1"),
            map: "de_nuke".to_string(),
            team_1_name: "One".to_string(),
            team_2_name: "Two".to_string(),
            timestamp: Utc::now(),
        };
        let Ok(Some(_)) = store.reserve_idle(&reservation).await else {
            panic!("server should be reserved");
        };
        let handle = ServerHandle::new(ServerId::new("srv"), Arc::clone(&control) as _);
        Fixture {
            control,
            storage,
            store,
            match_ref: MatchRef::new(reservation.league_id, reservation.match_id),
            handle,
        }
    }

    fn pipeline(f: &Fixture, config: DemoConfig) -> DemoPipeline {
        DemoPipeline::new(
            Arc::clone(&f.storage) as _,
            Arc::clone(&f.store) as _,
            config,
            "https://cdn.example/".to_string(),
        )
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(7).fill(&mut data[..]);
        data
    }

    async fn demo_status(f: &Fixture) -> DemoStatus {
        let Ok(Some(record)) = f.store.get_match(&f.match_ref).await else {
            panic!("match should exist");
        };
        record.demo_status
    }

    #[tokio::test]
    async fn small_demo_takes_single_shot_path() {
        let f = fixture().await;
        let name = format!("{}.dem", f.match_ref.match_id);
        f.control.add_file(&name, b"tiny recording".to_vec()).await;

        let outcome = pipeline(&f, demo_config(DEFAULT_DEMO_PART_SIZE, None))
            .upload(&f.handle, &f.match_ref)
            .await;
        let Ok(DemoOutcome::Ready { archive_id, demo_url }) = outcome else {
            panic!("demo should be archived");
        };
        assert!(archive_id.starts_with("small-"));
        assert_eq!(
            demo_url,
            format!("https://cdn.example/demos/{}.zip", f.match_ref.match_id)
        );
        assert_eq!(
            f.storage.calls.all().await,
            vec!["start_multipart", "cancel", "upload"]
        );
        assert_eq!(demo_status(&f).await, DemoStatus::Ready);
    }

    #[tokio::test]
    async fn large_demo_is_uploaded_in_parts() {
        let f = fixture().await;
        let name = format!("{}.dem", f.match_ref.match_id);
        f.control.add_file(&name, noise(300_000)).await;

        let outcome = pipeline(&f, demo_config(64 * 1024, None))
            .upload(&f.handle, &f.match_ref)
            .await;
        let Ok(DemoOutcome::Ready { archive_id, .. }) = outcome else {
            panic!("demo should be archived");
        };
        assert!(archive_id.starts_with("large-"));
        assert_eq!(f.storage.calls.count("cancel").await, 0);
        assert_eq!(f.storage.calls.count("upload").await, 0);
        assert_eq!(f.storage.calls.count("finish").await, 1);

        let sizes = f.storage.part_sizes.lock().await.clone();
        assert!(sizes.len() >= 4);
        if let Some((_, full)) = sizes.split_last() {
            assert!(full.iter().all(|s| *s >= 64 * 1024));
        }
        let Ok(Some(record)) = f.store.get_match(&f.match_ref).await else {
            panic!("match should exist");
        };
        assert_eq!(record.archive_id.as_deref(), Some(archive_id.as_str()));
    }

    #[tokio::test]
    async fn missing_recording_expires_demo() {
        let f = fixture().await;
        let outcome = pipeline(&f, demo_config(DEFAULT_DEMO_PART_SIZE, None))
            .upload(&f.handle, &f.match_ref)
            .await;
        assert!(matches!(outcome, Ok(DemoOutcome::Expired)));
        assert_eq!(f.storage.calls.count("cancel").await, 1);
        assert_eq!(demo_status(&f).await, DemoStatus::Expired);
    }

    #[tokio::test]
    async fn oversized_demo_is_discarded() {
        let f = fixture().await;
        let name = format!("{}.dem", f.match_ref.match_id);
        f.control.add_file(&name, noise(200_000)).await;

        let outcome = pipeline(&f, demo_config(DEFAULT_DEMO_PART_SIZE, Some(50_000)))
            .upload(&f.handle, &f.match_ref)
            .await;
        assert!(matches!(outcome, Ok(DemoOutcome::TooLarge)));
        assert_eq!(f.storage.calls.count("cancel").await, 1);
        assert_eq!(f.storage.calls.count("upload").await, 0);
        assert_eq!(demo_status(&f).await, DemoStatus::TooLarge);
    }
}
