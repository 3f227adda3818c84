use debtrace_common::{Source, WorkflowType};
use thiserror::Error;

/// Errors raised while resolving or executing a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Programmer error: the `(source, workflow_type)` pair was never
    /// registered. Surfaced loudly, never swallowed.
    #[error("no workflow registered for source \"{src}\" and type \"{workflow_type}\"")]
    Unregistered {
        src: Source,
        workflow_type: WorkflowType,
    },

    /// A fan-out workflow was built without a publisher.
    #[error("workflow for source \"{src}\" enqueues tasks but has no publisher")]
    MissingPublisher { src: Source },

    #[error(transparent)]
    Fetch(#[from] debtrace_fetch::FetchError),

    #[error(transparent)]
    Store(#[from] debtrace_store::StoreError),

    #[error(transparent)]
    Bus(#[from] debtrace_bus::BusError),

    /// Upstream data did not have the structure the extractor expects.
    #[error("{0}")]
    Scrape(String),

    /// Terminal wrapper produced by `execute`: the failure message as
    /// persisted to the task row, with the original error as cause.
    #[error("{message}")]
    Execution {
        message: String,
        #[source]
        cause: Box<WorkflowError>,
    },
}

impl WorkflowError {
    pub fn scrape(message: impl Into<String>) -> Self {
        WorkflowError::Scrape(message.into())
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
