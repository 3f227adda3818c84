//! Shared workflow choreography.
//!
//! Every workflow kind runs the same way: stamp the task, run the
//! kind-specific extraction, persist records and/or enqueue follow-up
//! tasks, then mark the task Completed. On any failure, persist an
//! Error update (message prefixed with the kind and message id) and
//! return the error so the dispatcher leaves the message unacked.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use debtrace_bus::Publisher;
use debtrace_common::{
    Source, StagedInvestment, StagedProject, TaskRequest, TaskUpdate, WorkflowType,
};
use debtrace_store::TaskStore;

use crate::error::{Result, WorkflowError};
use crate::strategies::{
    DownloadStrategy, FilingArchiveStrategy, FilingHistoryStrategy, FilingScrapeStrategy,
    ProjectScrapeStrategy, ResultsMultiScrapeStrategy, ResultsScrapeStrategy, SeedStrategy,
};

/// Everything a workflow learns from the bus message that triggered it.
#[derive(Debug, Clone)]
pub struct ExecuteContext {
    pub message_id: String,
    pub delivery_attempts: i64,
    pub job_id: i64,
    pub task_id: i64,
    pub source: Source,
    pub url: String,
}

enum Kind {
    Seed {
        strategy: Arc<dyn SeedStrategy>,
        next: WorkflowType,
    },
    Results {
        strategy: Arc<dyn ResultsScrapeStrategy>,
        next: WorkflowType,
    },
    ResultsMulti {
        strategy: Arc<dyn ResultsMultiScrapeStrategy>,
        next: WorkflowType,
    },
    Project {
        strategy: Arc<dyn ProjectScrapeStrategy>,
    },
    ProjectPartial {
        strategy: Arc<dyn ProjectScrapeStrategy>,
    },
    Download {
        strategy: Arc<dyn DownloadStrategy>,
    },
    FilingHistory {
        strategy: Arc<dyn FilingHistoryStrategy>,
    },
    FilingArchive {
        strategy: Arc<dyn FilingArchiveStrategy>,
        next: WorkflowType,
    },
    FilingScrape {
        strategy: Arc<dyn FilingScrapeStrategy>,
    },
}

/// A resolved workflow: one strategy plus the shared choreography.
pub struct Workflow {
    kind: Kind,
    store: Arc<dyn TaskStore>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl Workflow {
    pub fn seed(
        strategy: Arc<dyn SeedStrategy>,
        next: WorkflowType,
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            kind: Kind::Seed { strategy, next },
            store,
            publisher: Some(publisher),
        }
    }

    pub fn results(
        strategy: Arc<dyn ResultsScrapeStrategy>,
        next: WorkflowType,
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            kind: Kind::Results { strategy, next },
            store,
            publisher: Some(publisher),
        }
    }

    pub fn results_multi(
        strategy: Arc<dyn ResultsMultiScrapeStrategy>,
        next: WorkflowType,
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            kind: Kind::ResultsMulti { strategy, next },
            store,
            publisher: Some(publisher),
        }
    }

    pub fn project(strategy: Arc<dyn ProjectScrapeStrategy>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            kind: Kind::Project { strategy },
            store,
            publisher: None,
        }
    }

    pub fn project_partial(
        strategy: Arc<dyn ProjectScrapeStrategy>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            kind: Kind::ProjectPartial { strategy },
            store,
            publisher: None,
        }
    }

    pub fn download(strategy: Arc<dyn DownloadStrategy>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            kind: Kind::Download { strategy },
            store,
            publisher: None,
        }
    }

    pub fn filing_history(
        strategy: Arc<dyn FilingHistoryStrategy>,
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            kind: Kind::FilingHistory { strategy },
            store,
            publisher: Some(publisher),
        }
    }

    pub fn filing_archive(
        strategy: Arc<dyn FilingArchiveStrategy>,
        next: WorkflowType,
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            kind: Kind::FilingArchive { strategy, next },
            store,
            publisher: Some(publisher),
        }
    }

    pub fn filing_scrape(
        strategy: Arc<dyn FilingScrapeStrategy>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            kind: Kind::FilingScrape { strategy },
            store,
            publisher: None,
        }
    }

    fn kind_label(&self) -> &'static str {
        match self.kind {
            Kind::Seed { .. } => "Seed URL generation",
            Kind::Results { .. } => "Results page scraping",
            Kind::ResultsMulti { .. } => "Results page multi-scraping",
            Kind::Project { .. } => "Project page scraping",
            Kind::ProjectPartial { .. } => "Project partial page scraping",
            Kind::Download { .. } => "Project download",
            Kind::FilingHistory { .. } => "Filing history scraping",
            Kind::FilingArchive { .. } => "Filing archive scraping",
            Kind::FilingScrape { .. } => "Filing scraping",
        }
    }

    /// Runs the workflow for one bus message.
    ///
    /// On failure the task row records the error before the error is
    /// returned; the caller must not ack the message in that case.
    pub async fn execute(&self, ctx: &ExecuteContext) -> Result<()> {
        let mut update = TaskUpdate::begin(ctx.task_id, ctx.delivery_attempts);
        info!(
            job_id = ctx.job_id,
            source = %ctx.source,
            task_id = ctx.task_id,
            message_id = %ctx.message_id,
            "Processing task"
        );

        match self.run(ctx, &mut update).await {
            Ok(()) => {
                update.status = Some(debtrace_common::StageStatus::Completed);
                update.processing_end_utc = Some(Utc::now());
                self.store.update_task(&update).await?;
                Ok(())
            }
            Err(cause) => {
                let message = format!(
                    "{} workflow failed for message {}. {}",
                    self.kind_label(),
                    ctx.message_id,
                    cause
                );
                error!(
                    job_id = ctx.job_id,
                    source = %ctx.source,
                    task_id = ctx.task_id,
                    error = %message,
                    "Workflow failed"
                );

                update.status = Some(debtrace_common::StageStatus::Error);
                update.last_failed_at_utc = Some(Utc::now());
                update.last_error_message = Some(message.clone());
                if let Err(persist_err) = self.store.update_task(&update).await {
                    error!(
                        task_id = ctx.task_id,
                        error = %persist_err,
                        "Failed to record task failure"
                    );
                }

                Err(WorkflowError::Execution {
                    message,
                    cause: Box::new(cause),
                })
            }
        }
    }

    async fn run(&self, ctx: &ExecuteContext, update: &mut TaskUpdate) -> Result<()> {
        match &self.kind {
            Kind::Seed { strategy, next } => {
                update.scraping_start_utc = Some(Utc::now());
                let urls = strategy.seed_urls().await?;
                update.scraping_end_utc = Some(Utc::now());
                self.enqueue_tasks(ctx, urls.into_iter().map(|u| (u, *next))).await
            }
            Kind::Results { strategy, next } => {
                update.scraping_start_utc = Some(Utc::now());
                let urls = strategy.scrape_results_page(&ctx.url).await?;
                update.scraping_end_utc = Some(Utc::now());
                self.enqueue_tasks(ctx, urls.into_iter().map(|u| (u, *next))).await
            }
            Kind::ResultsMulti { strategy, next } => {
                update.scraping_start_utc = Some(Utc::now());
                let (urls, partials) = strategy.scrape_results_page(&ctx.url).await?;
                update.scraping_end_utc = Some(Utc::now());
                self.persist_projects(ctx, partials).await?;
                self.enqueue_tasks(ctx, urls.into_iter().map(|u| (u, *next))).await
            }
            Kind::Project { strategy } | Kind::ProjectPartial { strategy } => {
                update.scraping_start_utc = Some(Utc::now());
                let records = strategy.scrape_project_page(&ctx.url).await?;
                update.scraping_end_utc = Some(Utc::now());
                self.persist_projects(ctx, records).await
            }
            Kind::Download { strategy } => {
                update.scraping_start_utc = Some(Utc::now());
                let records = strategy.fetch_projects().await?;
                update.scraping_end_utc = Some(Utc::now());
                self.persist_projects(ctx, records).await
            }
            Kind::FilingHistory { strategy } => {
                update.scraping_start_utc = Some(Utc::now());
                let (recent, archived) = strategy.scrape_filing_history(&ctx.url).await?;
                update.scraping_end_utc = Some(Utc::now());
                let follow_ups = recent
                    .into_iter()
                    .map(|u| (u, WorkflowType::FilingScrape))
                    .chain(archived.into_iter().map(|u| (u, WorkflowType::FilingArchive)));
                self.enqueue_tasks(ctx, follow_ups).await
            }
            Kind::FilingArchive { strategy, next } => {
                update.scraping_start_utc = Some(Utc::now());
                let urls = strategy.scrape_archived_submissions(&ctx.url).await?;
                update.scraping_end_utc = Some(Utc::now());
                self.enqueue_tasks(ctx, urls.into_iter().map(|u| (u, *next))).await
            }
            Kind::FilingScrape { strategy } => {
                update.scraping_start_utc = Some(Utc::now());
                let records = strategy.scrape_investments(&ctx.url).await?;
                update.scraping_end_utc = Some(Utc::now());
                self.persist_investments(ctx, records).await
            }
        }
    }

    /// The single task-insert-and-publish operation: conflict-ignore
    /// bulk create, then one bus message per row the store reports as
    /// newly created. Re-runs therefore publish nothing.
    async fn enqueue_tasks(
        &self,
        ctx: &ExecuteContext,
        follow_ups: impl Iterator<Item = (String, WorkflowType)>,
    ) -> Result<()> {
        let publisher = self
            .publisher
            .as_ref()
            .ok_or(WorkflowError::MissingPublisher { src: ctx.source })?;

        let requests: Vec<TaskRequest> = follow_ups
            .map(|(url, workflow_type)| TaskRequest::new(ctx.job_id, ctx.source, url, workflow_type))
            .collect();
        if requests.is_empty() {
            return Ok(());
        }

        let created = self.store.bulk_create_tasks(&requests).await?;
        info!(
            job_id = ctx.job_id,
            source = %ctx.source,
            requested = requests.len(),
            created = created.len(),
            "Enqueueing follow-up tasks"
        );

        for task in &created {
            let payload = serde_json::to_value(task)
                .map_err(|e| debtrace_bus::BusError::Payload(e.to_string()))?;
            publisher.publish(&payload).await?;
        }
        Ok(())
    }

    async fn persist_projects(
        &self,
        ctx: &ExecuteContext,
        mut records: Vec<StagedProject>,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &mut records {
            record.task_id = Some(ctx.task_id);
        }
        self.store.bulk_insert_staged_projects(&records).await?;
        info!(
            job_id = ctx.job_id,
            source = %ctx.source,
            records = records.len(),
            "Persisted staged projects"
        );
        Ok(())
    }

    async fn persist_investments(
        &self,
        ctx: &ExecuteContext,
        mut records: Vec<StagedInvestment>,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in &mut records {
            record.task_id = Some(ctx.task_id);
        }
        self.store.bulk_insert_staged_investments(&records).await?;
        info!(
            job_id = ctx.job_id,
            source = %ctx.source,
            records = records.len(),
            "Persisted staged investments"
        );
        Ok(())
    }
}
