//! Cleaning-job orchestration: decode the push envelope, stamp the
//! job's cleaning stage, and run the pipeline matching its job type.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};

use debtrace_common::{JobType, JobUpdate, StageStatus};
use debtrace_store::TransformStore;

use crate::error::Result;
use crate::investments::InvestmentTransform;
use crate::projects::ProjectTransform;

/// Errors decoding the bus push envelope; these map to 400 responses.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("no bus message received")]
    Missing,
    #[error("invalid bus message format")]
    Format,
    #[error("bus message missing \"job_id\" attribute")]
    MissingJobId,
}

#[derive(Debug, Deserialize)]
struct AuditPayload {
    job_id: i64,
}

/// Extracts the job id from a push envelope: the base64-decoded
/// `message.data` holds `{"job_id": N}`.
pub fn decode_push_envelope(envelope: &serde_json::Value) -> std::result::Result<i64, EnvelopeError> {
    if envelope.is_null() {
        return Err(EnvelopeError::Missing);
    }
    let message = envelope
        .as_object()
        .and_then(|o| o.get("message"))
        .ok_or(EnvelopeError::Format)?;
    let data = message
        .get("data")
        .and_then(|d| d.as_str())
        .ok_or(EnvelopeError::Format)?;
    let decoded = BASE64.decode(data).map_err(|_| EnvelopeError::Format)?;
    let payload: AuditPayload =
        serde_json::from_slice(&decoded).map_err(|_| EnvelopeError::MissingJobId)?;
    Ok(payload.job_id)
}

pub struct TransformJobHandler {
    store: Arc<dyn TransformStore>,
    projects: ProjectTransform,
    investments: InvestmentTransform,
}

impl TransformJobHandler {
    pub fn new(
        store: Arc<dyn TransformStore>,
        projects: ProjectTransform,
        investments: InvestmentTransform,
    ) -> Self {
        Self {
            store,
            projects,
            investments,
        }
    }

    /// Runs the cleaning stage for one job. The job row tracks the
    /// stage through InProgress to Completed or Error.
    pub async fn handle(&self, job_id: i64) -> Result<String> {
        info!(job_id, "Starting data cleaning stage");
        let job = self
            .store
            .update_job(&JobUpdate {
                id: job_id,
                data_clean_stage: Some(StageStatus::InProgress),
                data_clean_start_utc: Some(Utc::now()),
                ..JobUpdate::default()
            })
            .await?;

        let outcome = match job.job_type {
            JobType::DevBankProjects => self.projects.run().await,
            JobType::Form13f => self.investments.run().await,
        };

        match outcome {
            Ok(()) => {
                let completion = self
                    .store
                    .update_job(&JobUpdate {
                        id: job_id,
                        data_clean_stage: Some(StageStatus::Completed),
                        data_clean_end_utc: Some(Utc::now()),
                        ..JobUpdate::default()
                    })
                    .await;
                if let Err(e) = completion {
                    error!(job_id, error = %e, "Failed to mark cleaning stage complete");
                }
                Ok(format!(
                    "Successfully transformed records for job \"{job_id}\" of type \"{}\".",
                    job.job_type
                ))
            }
            Err(e) => {
                error!(job_id, error = %e, "Data transform failed");
                let failure_update = self
                    .store
                    .update_job(&JobUpdate {
                        id: job_id,
                        data_clean_stage: Some(StageStatus::Error),
                        ..JobUpdate::default()
                    })
                    .await;
                if let Err(persist_err) = failure_update {
                    error!(job_id, error = %persist_err, "Failed to record cleaning failure");
                }
                Err(e)
            }
        }
    }
}
