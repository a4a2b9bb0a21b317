//! The two stages wired together: extraction of one playlist, and
//! transformation of every pending raw object.

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::archive::{ErrorDetails, Phase, RawArchiver};
use crate::auth::TokenProvider;
use crate::config::{ExtractionConfig, TransformConfig};
use crate::error::{EtlError, Result};
use crate::export::{ExportKeys, ExportWriter};
use crate::fetch::{get_client, parse_playlist_id, PlaylistExtractor};
use crate::normalize::{normalize, RunClock};
use crate::storage::{key_stem, DataStage, ObjectStorage, Relocator};
use crate::types::RawExtraction;

/// Inbound trigger for an extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionEvent {
    #[serde(default)]
    pub playlist_link: Option<String>,
    #[serde(default)]
    pub data_stage: DataStage,
}

impl ExtractionEvent {
    /// Decodes a JSON trigger payload. Malformed JSON and unknown stages are
    /// rejected as [`EtlError::InvalidEvent`].
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| EtlError::InvalidEvent(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReceipt {
    pub status: String,
    pub playlist_id: String,
    pub total_tracks: usize,
    pub export_location: String,
    pub data_stage: DataStage,
    pub extracted_at: Option<String>,
}

pub struct ExtractionPipeline {
    tokens: TokenProvider,
    extractor: PlaylistExtractor,
    archiver: RawArchiver,
}

impl ExtractionPipeline {
    pub fn new(
        tokens: TokenProvider,
        extractor: PlaylistExtractor,
        archiver: RawArchiver,
    ) -> Self {
        Self {
            tokens,
            extractor,
            archiver,
        }
    }

    pub fn from_config(config: &ExtractionConfig, request_id: Option<String>) -> Result<Self> {
        let client = get_client(config.api.request_timeout)?;
        let storage = ObjectStorage::open(&config.storage)?;
        Ok(Self::new(
            TokenProvider::new(
                client.clone(),
                config.api.token_url.clone(),
                config.credentials.clone(),
            ),
            PlaylistExtractor::new(client, &config.api),
            RawArchiver::new(storage, request_id),
        ))
    }

    /// A link that does not name a playlist fails before any network call
    /// and leaves no records behind. Later failures are recorded in the
    /// error log and dead-lettered.
    pub async fn run(&self, event: &ExtractionEvent) -> Result<ExtractionReceipt> {
        let link = event.playlist_link.as_deref().unwrap_or_default();
        let playlist_id = parse_playlist_id(link)?;
        info!(playlist_id = %playlist_id, data_stage = %event.data_stage, "Processing playlist");

        match self.extract_and_archive(&playlist_id, link, event.data_stage).await {
            Ok(receipt) => Ok(receipt),
            Err((phase, err)) => {
                error!(
                    playlist_id = %playlist_id,
                    phase = ?phase,
                    error = %err,
                    "Extraction run failed"
                );
                self.archiver
                    .record_extraction_failure(
                        &playlist_id,
                        link,
                        event.data_stage,
                        ErrorDetails::from_error(&err, phase),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn extract_and_archive(
        &self,
        playlist_id: &str,
        link: &str,
        stage: DataStage,
    ) -> std::result::Result<ExtractionReceipt, (Phase, EtlError)> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| (Phase::Authenticate, e))?;
        let raw = self
            .extractor
            .extract(&token, playlist_id)
            .await
            .map_err(|e| (Phase::Extract, e))?;
        let key = self
            .archiver
            .archive(&raw, stage)
            .await
            .map_err(|e| (Phase::Archive, e))?;
        self.archiver
            .write_execution_log(&raw, link, stage, &key)
            .await
            .map_err(|e| (Phase::Archive, e))?;

        Ok(ExtractionReceipt {
            status: "success".to_string(),
            playlist_id: raw.playlist_id.clone(),
            total_tracks: raw.total_tracks,
            export_location: self.archiver.storage().location(&key),
            data_stage: stage,
            extracted_at: raw.extracted_at.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedFile {
    pub source_key: String,
    pub done_key: String,
    pub playlist_id: String,
    pub albums: usize,
    pub artists: usize,
    pub songs: usize,
    pub transformed_at: String,
    pub exports: ExportKeys,
    pub warnings: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub source_key: String,
    pub error_kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformSummary {
    pub processed: Vec<ProcessedFile>,
    pub failed: Vec<FailedFile>,
}

/// Normalizes, exports and relocates pending raw objects one at a time.
/// Each object gets its own run stamp, and a failing object stays in the
/// pending namespace for a later attempt. Objects whose done copy already
/// exists are settled instead of processed again.
pub struct TransformPipeline {
    storage: ObjectStorage,
    exports: ExportWriter,
    relocator: Relocator,
    archiver: RawArchiver,
    clock: RunClock,
}

impl TransformPipeline {
    pub fn new(storage: ObjectStorage, request_id: Option<String>) -> Self {
        Self {
            exports: ExportWriter::new(storage.clone()),
            relocator: Relocator::new(storage.clone()),
            archiver: RawArchiver::new(storage.clone(), request_id),
            clock: RunClock::new(),
            storage,
        }
    }

    pub fn from_config(config: &TransformConfig, request_id: Option<String>) -> Result<Self> {
        Ok(Self::new(ObjectStorage::open(&config.storage)?, request_id))
    }

    pub async fn run(&mut self) -> Result<TransformSummary> {
        let pending = self.storage.list_pending().await?;
        if pending.is_empty() {
            info!("No files to process");
        }

        let mut summary = TransformSummary::default();
        let total = pending.len();
        for (idx, key) in pending.into_iter().enumerate() {
            info!(file = idx + 1, total, key = %key, "Processing raw object");
            match self.process(&key).await {
                Ok(Some(processed)) => summary.processed.push(processed),
                Ok(None) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "Raw object left in pending");
                    self.archiver
                        .write_error_record(
                            &format!("transform_{}", key_stem(&key)),
                            &ErrorDetails::from_error(&err, Phase::Transform),
                        )
                        .await;
                    summary.failed.push(FailedFile {
                        source_key: key,
                        error_kind: err.kind().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            processed = summary.processed.len(),
            failed = summary.failed.len(),
            "Transformation finished"
        );
        Ok(summary)
    }

    async fn process(&mut self, key: &str) -> Result<Option<ProcessedFile>> {
        if self.relocator.settle(key).await? {
            return Ok(None);
        }

        let body = self.storage.get(key).await?;
        let raw: RawExtraction =
            serde_json::from_slice(&body).map_err(|e| EtlError::MalformedRaw {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let batch = normalize(&raw, self.clock.next_stamp());
        let exports = self.exports.write_batch(&batch).await?;
        let done_key = self.relocator.relocate(key).await?;

        Ok(Some(ProcessedFile {
            source_key: key.to_string(),
            done_key,
            playlist_id: batch.playlist_id.clone(),
            albums: batch.albums.len(),
            artists: batch.artists.len(),
            songs: batch.songs.len(),
            transformed_at: batch
                .transformed_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            exports,
            warnings: batch.diagnostics.summary(),
        }))
    }
}
