use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{EtlError, Result};
use crate::pipeline::{ExtractionReceipt, TransformSummary};

/// Outbound result of one invocation: an HTTP-style status plus a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HandlerResponse {
    /// 400 for recognized pipeline failures, 500 for anything unexpected.
    pub fn from_error(err: &EtlError) -> Self {
        if err.is_recognized() {
            Self {
                status_code: 400,
                body: json!({"error_kind": err.kind(), "message": err.to_string()}),
            }
        } else {
            Self {
                status_code: 500,
                body: json!({"error_kind": err.kind(), "message": "An unexpected error occurred"}),
            }
        }
    }

    pub fn from_extraction(result: Result<ExtractionReceipt>) -> Self {
        match result {
            Ok(receipt) => Self {
                status_code: 200,
                body: json!({"message": "Playlist processed successfully", "data": receipt}),
            },
            Err(err) => Self::from_error(&err),
        }
    }

    pub fn from_transform(result: Result<TransformSummary>) -> Self {
        let summary = match result {
            Ok(summary) => summary,
            Err(err) => return Self::from_error(&err),
        };
        if summary.failed.is_empty() {
            let message = if summary.processed.is_empty() {
                "No files to process"
            } else {
                "Transformation completed successfully"
            };
            Self {
                status_code: 200,
                body: json!({
                    "message": message,
                    "files_processed": summary.processed.len(),
                    "files_failed": 0,
                    "outputs": summary.processed,
                }),
            }
        } else {
            let (processed, failed) = (summary.processed.len(), summary.failed.len());
            Self {
                status_code: 400,
                body: json!({
                    "error_kind": "TRANSFORMATION_ERROR",
                    "message": format!("{} of {} files failed", failed, failed + processed),
                    "files_processed": processed,
                    "files_failed": failed,
                    "outputs": summary.processed,
                    "failures": summary.failed,
                }),
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status_code {
            200..=299 => 0,
            400..=499 => 2,
            _ => 1,
        }
    }
}
