//! Persistence of raw extractions and of the records that describe runs.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{EtlError, Result};
use crate::storage::{self, DataStage, ObjectStorage};
use crate::types::RawExtraction;

/// Where in a run a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Authenticate,
    Extract,
    Archive,
    Transform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub timestamp: String,
    pub playlist_id: String,
    pub playlist_link: String,
    pub data_stage: DataStage,
    pub total_tracks: usize,
    pub location: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error_kind: String,
    pub message: String,
    pub playlist_link: Option<String>,
    pub data_stage: Option<DataStage>,
    pub phase: Phase,
}

impl ErrorDetails {
    pub fn from_error(err: &EtlError, phase: Phase) -> Self {
        Self {
            error_kind: err.kind().to_string(),
            message: err.to_string(),
            playlist_link: None,
            data_stage: None,
            phase,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: String,
    pub playlist_id: String,
    pub error_details: ErrorDetails,
    pub request_id: String,
}

/// Best-effort copy of a failed extraction's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub playlist_link: String,
    pub error: ErrorDetails,
    pub timestamp: String,
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone)]
pub struct RawArchiver {
    storage: ObjectStorage,
    request_id: Option<String>,
}

impl RawArchiver {
    pub fn new(storage: ObjectStorage, request_id: Option<String>) -> Self {
        Self {
            storage,
            request_id,
        }
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    /// Writes the extraction under the stage's namespace and returns its key.
    pub async fn archive(&self, raw: &RawExtraction, stage: DataStage) -> Result<String> {
        let key = stage.namespace().raw_key(&raw.playlist_id, Utc::now());
        self.storage.put_json(&key, raw).await?;
        info!(
            location = %self.storage.location(&key),
            tracks = raw.total_tracks,
            "Uploaded raw extraction"
        );
        Ok(key)
    }

    pub async fn write_execution_log(
        &self,
        raw: &RawExtraction,
        playlist_link: &str,
        stage: DataStage,
        raw_key: &str,
    ) -> Result<String> {
        let now = Utc::now();
        let record = ExecutionLog {
            timestamp: iso(now),
            playlist_id: raw.playlist_id.clone(),
            playlist_link: playlist_link.to_string(),
            data_stage: stage,
            total_tracks: raw.total_tracks,
            location: self.storage.location(raw_key),
            status: "success".to_string(),
        };
        let key = storage::execution_log_key(&raw.playlist_id, now);
        self.storage.put_json(&key, &record).await?;
        Ok(key)
    }

    /// Error record for `subject` (a playlist id or a raw object stem).
    /// Write failures are logged and swallowed.
    pub async fn write_error_record(
        &self,
        subject: &str,
        details: &ErrorDetails,
    ) -> Option<String> {
        let now = Utc::now();
        let record = ErrorRecord {
            timestamp: iso(now),
            playlist_id: subject.to_string(),
            error_details: details.clone(),
            request_id: self
                .request_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        };
        let key = storage::error_log_key(subject, now);
        match self.storage.put_json(&key, &record).await {
            Ok(()) => {
                info!(location = %self.storage.location(&key), "Error log saved");
                Some(key)
            }
            Err(e) => {
                error!(error = %e, "Failed to save error log");
                None
            }
        }
    }

    /// Error record plus dead-letter copy in the failed namespace. Neither
    /// write can mask the original failure.
    pub async fn record_extraction_failure(
        &self,
        playlist_id: &str,
        playlist_link: &str,
        stage: DataStage,
        details: ErrorDetails,
    ) {
        let details = ErrorDetails {
            playlist_link: Some(playlist_link.to_string()),
            data_stage: Some(stage),
            ..details
        };
        self.write_error_record(playlist_id, &details).await;

        let now = Utc::now();
        let dead_letter = DeadLetter {
            playlist_link: playlist_link.to_string(),
            error: details,
            timestamp: iso(now),
        };
        let key = storage::dead_letter_key(playlist_id, now);
        if let Err(e) = self.storage.put_json(&key, &dead_letter).await {
            error!(error = %e, key = %key, "Failed to save dead-letter record");
        }
    }
}
