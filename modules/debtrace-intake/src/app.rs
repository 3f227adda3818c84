//! Job-queueing endpoint. The scheduler POSTs a list of sources; the
//! handler creates (or reuses) the pipeline job and seeds one starter
//! task per source, publishing only the rows the store reports as new
//! so a re-trigger with the same identifiers queues nothing twice.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{error, info};

use debtrace_bus::Publisher;
use debtrace_common::{JobType, Source, TaskRequest};
use debtrace_store::TaskStore;
use debtrace_workflows::starter_workflow;

pub const SUCCESS_MESSAGE: &str = "Workflows queued successfully.";

const JOB_NAME_HEADER: &str = "X-CloudScheduler-JobName";
const TRACE_HEADER: &str = "X-Cloud-Trace-Context";

pub struct IntakeState {
    pub store: Arc<dyn TaskStore>,
    pub publisher: Arc<dyn Publisher>,
}

pub fn router(state: Arc<IntakeState>) -> Router {
    Router::new()
        .route("/", post(queue_workflows))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn queue_workflows(
    State(state): State<Arc<IntakeState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, String) {
    match handle(&state, &headers, &body).await {
        Ok(message) => (StatusCode::OK, message),
        Err(e) => {
            error!(error = %e.1, "Failed to queue workflows");
            e
        }
    }
}

type HandlerError = (StatusCode, String);

fn bad_request(message: impl Into<String>) -> HandlerError {
    (StatusCode::BAD_REQUEST, message.into())
}

fn server_error(message: impl Into<String>) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, message.into())
}

async fn handle(
    state: &IntakeState,
    headers: &HeaderMap,
    body: &serde_json::Value,
) -> Result<String, HandlerError> {
    info!("Received request to queue workflows");

    // Scheduler identity headers compose the idempotency key.
    let job_name = header_value(headers, JOB_NAME_HEADER)?;
    let trace = header_value(headers, TRACE_HEADER)?;

    let sources = parse_sources(body)?;
    let job_type = resolve_job_type(&sources)?;

    let invocation_id = format!("{job_name}-{trace}");
    let (job_id, created) = state
        .store
        .create_job(&invocation_id, job_type)
        .await
        .map_err(|e| server_error(format!("Failed to queue workflows. Job creation failed. {e}")))?;
    if !created {
        info!(%invocation_id, job_id, "Reusing existing pipeline job");
    }

    // Starter tasks carry an empty URL; each source declares its own
    // entry-point workflow.
    let starter_tasks: Vec<TaskRequest> = sources
        .iter()
        .map(|source| TaskRequest::new(job_id, *source, "", starter_workflow(*source)))
        .collect();
    let created_tasks = state
        .store
        .bulk_create_tasks(&starter_tasks)
        .await
        .map_err(|e| server_error(format!("Failed to queue workflows. {e}")))?;
    info!(created = created_tasks.len(), "Created starter tasks");

    for task in &created_tasks {
        let payload = serde_json::to_value(task)
            .map_err(|e| server_error(format!("Failed to queue workflows. {e}")))?;
        state.publisher.publish(&payload).await.map_err(|e| {
            server_error(format!(
                "Failed to queue workflows. Not all {} task messages were published. {e}",
                created_tasks.len()
            ))
        })?;
    }

    info!(job_id, sources = sources.len(), "{SUCCESS_MESSAGE}");
    Ok(SUCCESS_MESSAGE.to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<String, HandlerError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            bad_request(format!(
                "Failed to queue workflows. Missing expected HTTP request header {name}."
            ))
        })
}

/// Validates the `{"sources": [...]}` body and deduplicates it into a
/// sorted set of known sources.
fn parse_sources(body: &serde_json::Value) -> Result<Vec<Source>, HandlerError> {
    let raw = body
        .get("sources")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            bad_request(
                "Failed to queue workflows. HTTP request body did not follow \
                 expected JSON schema {\"sources\": [\"...\"]}.",
            )
        })?;
    if raw.is_empty() {
        return Err(bad_request(
            "Failed to queue workflows. One or more data sources must be specified.",
        ));
    }

    let mut sources = BTreeSet::new();
    for value in raw {
        let name = value.as_str().ok_or_else(|| {
            bad_request("Failed to queue workflows. Source names must be strings.")
        })?;
        let source: Source = name.parse().map_err(|_| {
            let valid: Vec<&str> = Source::ALL.iter().map(|s| s.as_str()).collect();
            bad_request(format!(
                "Failed to queue workflows. Received invalid source name \"{name}\". \
                 Only the following names are permitted: {}.",
                valid.join(", ")
            ))
        })?;
        sources.insert(source);
    }

    Ok(sources.into_iter().collect())
}

/// All sources in one trigger must share a job type; the filing
/// pipeline never mixes with the project banks.
fn resolve_job_type(sources: &[Source]) -> Result<JobType, HandlerError> {
    let mut job_types: Vec<JobType> = sources.iter().map(|s| s.job_type()).collect();
    job_types.dedup();
    match job_types.as_slice() {
        [job_type] => Ok(*job_type),
        _ => Err(bad_request(
            "Failed to queue workflows. Regulatory-filing sources cannot be mixed \
             with project-bank sources in one request.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use debtrace_workflows::testing::{MockPublisher, MockStore};

    fn state() -> (Arc<IntakeState>, Arc<MockStore>, Arc<MockPublisher>) {
        let store = Arc::new(MockStore::new());
        let publisher = Arc::new(MockPublisher::new());
        let state = Arc::new(IntakeState {
            store: store.clone(),
            publisher: publisher.clone(),
        });
        (state, store, publisher)
    }

    fn scheduler_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(JOB_NAME_HEADER, "nightly-projects".parse().unwrap());
        headers.insert(TRACE_HEADER, "abc123/456".parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn trigger_creates_job_and_publishes_starter_tasks() {
        let (state, store, publisher) = state();
        let body = serde_json::json!({ "sources": ["adb", "kfw", "adb"] });

        let result = handle(&state, &scheduler_headers(), &body).await.unwrap();
        assert_eq!(result, SUCCESS_MESSAGE);

        // Deduped to two sources, each with its declared starter.
        let created = store.created_tasks.lock().unwrap();
        assert_eq!(created.len(), 2);
        let adb = created.iter().find(|t| t.source == Source::Adb).unwrap();
        assert_eq!(adb.workflow_type, debtrace_common::WorkflowType::SeedUrls);
        assert_eq!(adb.url, "");
        let kfw = created.iter().find(|t| t.source == Source::Kfw).unwrap();
        assert_eq!(kfw.workflow_type, debtrace_common::WorkflowType::Download);
        assert_eq!(publisher.published_count(), 2);
    }

    #[tokio::test]
    async fn re_trigger_with_same_identity_publishes_nothing() {
        let (state, store, publisher) = state();
        let body = serde_json::json!({ "sources": ["adb"] });

        handle(&state, &scheduler_headers(), &body).await.unwrap();
        let result = handle(&state, &scheduler_headers(), &body).await.unwrap();

        // Second call reuses the job and finds no new rows to publish.
        assert_eq!(result, SUCCESS_MESSAGE);
        assert_eq!(store.created_task_count(), 1);
        assert_eq!(publisher.published_count(), 1);
    }

    #[tokio::test]
    async fn missing_scheduler_header_is_a_bad_request() {
        let (state, _, _) = state();
        let body = serde_json::json!({ "sources": ["adb"] });
        let err = handle(&state, &HeaderMap::new(), &body).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1.contains(JOB_NAME_HEADER));
    }

    #[tokio::test]
    async fn empty_source_list_is_a_bad_request() {
        let (state, _, _) = state();
        let body = serde_json::json!({ "sources": [] });
        let err = handle(&state, &scheduler_headers(), &body).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_source_is_a_bad_request() {
        let (state, _, _) = state();
        let body = serde_json::json!({ "sources": ["adb", "worldbank"] });
        let err = handle(&state, &scheduler_headers(), &body).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1.contains("worldbank"));
    }

    #[tokio::test]
    async fn mixing_filing_and_bank_sources_is_a_bad_request() {
        let (state, _, _) = state();
        let body = serde_json::json!({ "sources": ["adb", "sec"] });
        let err = handle(&state, &scheduler_headers(), &body).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sec_alone_resolves_to_the_filing_job_type() {
        let (state, store, _) = state();
        let body = serde_json::json!({ "sources": ["sec"] });
        handle(&state, &scheduler_headers(), &body).await.unwrap();
        let created = store.created_tasks.lock().unwrap();
        assert_eq!(
            created[0].workflow_type,
            debtrace_common::WorkflowType::SeedUrls
        );
    }

    #[tokio::test]
    async fn publish_failure_is_a_server_error_but_rows_persist() {
        let store = Arc::new(MockStore::new());
        let publisher = Arc::new(MockPublisher::new().fail_after(0));
        let state = Arc::new(IntakeState {
            store: store.clone(),
            publisher,
        });
        let body = serde_json::json!({ "sources": ["adb"] });

        let err = handle(&state, &scheduler_headers(), &body).await.unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.created_task_count(), 1);
    }
}
