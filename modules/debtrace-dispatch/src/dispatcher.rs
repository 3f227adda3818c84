//! Pull → dispatch → ack loop.
//!
//! Messages in one pulled batch run in parallel across a bounded
//! worker pool. Workers report `(job_id, ack_id)` over a channel; the
//! single consumer inserts into the encountered-jobs set and acks, so
//! the two effects stay paired without locks. One empty pull after a
//! non-empty cycle is read as quiescence and triggers the audit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use debtrace_bus::{Publisher, Subscriber};
use debtrace_common::{AuditMessage, JobUpdate, StageStatus, TaskRecord};
use debtrace_workflows::{EngineDeps, ExecuteContext, WorkflowRegistry};

/// What one loop iteration did.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Handled this many messages (successes and failures alike).
    Processed(usize),
    /// Quiescence: audited this many jobs.
    Audited(usize),
    /// Nothing to do.
    Idle,
}

pub struct Dispatcher {
    subscriber: Arc<dyn Subscriber>,
    cleaning_publisher: Arc<dyn Publisher>,
    registry: Arc<WorkflowRegistry>,
    deps: EngineDeps,
    max_workers: usize,
    idle_sleep: Duration,
    encountered_jobs: HashSet<i64>,
    had_messages_last_cycle: bool,
}

impl Dispatcher {
    pub fn new(
        subscriber: Arc<dyn Subscriber>,
        cleaning_publisher: Arc<dyn Publisher>,
        registry: Arc<WorkflowRegistry>,
        deps: EngineDeps,
        max_workers: usize,
    ) -> Self {
        Self {
            subscriber,
            cleaning_publisher,
            registry,
            deps,
            max_workers: max_workers.max(1),
            idle_sleep: Duration::from_secs(5),
            encountered_jobs: HashSet::new(),
            had_messages_last_cycle: false,
        }
    }

    /// Runs forever. Pull errors back off for one idle period rather
    /// than killing the process.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(max_workers = self.max_workers, "Dispatcher started");
        loop {
            match self.run_cycle().await {
                Ok(CycleOutcome::Processed(count)) => {
                    info!(messages = count, "Processed message batch");
                }
                Ok(CycleOutcome::Audited(jobs)) => {
                    info!(jobs, "Audited completed jobs");
                }
                Ok(CycleOutcome::Idle) => {
                    tokio::time::sleep(self.idle_sleep).await;
                }
                Err(e) => {
                    error!(error = %e, "Dispatch cycle failed");
                    tokio::time::sleep(self.idle_sleep).await;
                }
            }
        }
    }

    /// One pull → dispatch → ack (or audit) iteration.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleOutcome> {
        let batch = self.subscriber.pull().await.context("message pull failed")?;

        if !batch.is_empty() {
            let count = batch.len();
            let (tx, mut rx) = mpsc::channel::<(i64, String)>(count);
            let semaphore = Arc::new(Semaphore::new(self.max_workers));
            let mut workers = JoinSet::new();

            for message in batch {
                let tx = tx.clone();
                let semaphore = semaphore.clone();
                let registry = self.registry.clone();
                let deps = self.deps.clone();
                workers.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("dispatcher semaphore closed");
                    match handle_message(&registry, &deps, &message.data, message.delivery_attempts, &message.message_id).await {
                        Ok(job_id) => {
                            // Channel capacity equals the batch size, so
                            // this send cannot block indefinitely.
                            let _ = tx.send((job_id, message.ack_id)).await;
                        }
                        Err(e) => {
                            error!(
                                message_id = %message.message_id,
                                error = %e,
                                "Failed to process message; leaving unacked"
                            );
                        }
                    }
                });
            }
            drop(tx);

            // Single consumer: set insert and ack happen together.
            while let Some((job_id, ack_id)) = rx.recv().await {
                self.encountered_jobs.insert(job_id);
                if let Err(e) = self.subscriber.ack(&ack_id).await {
                    warn!(error = %e, "Ack failed; message will redeliver");
                }
            }
            while workers.join_next().await.is_some() {}

            self.had_messages_last_cycle = true;
            return Ok(CycleOutcome::Processed(count));
        }

        if self.had_messages_last_cycle {
            let jobs = self.audit().await?;
            return Ok(CycleOutcome::Audited(jobs));
        }

        Ok(CycleOutcome::Idle)
    }

    /// Marks every encountered job's collection stage complete and
    /// publishes one cleaning-stage message per job. A failure on one
    /// job does not stop the others; the first error is surfaced after
    /// all jobs were attempted.
    async fn audit(&mut self) -> anyhow::Result<usize> {
        let completed_at = Utc::now();
        let mut jobs: Vec<i64> = self.encountered_jobs.drain().collect();
        jobs.sort_unstable();
        self.had_messages_last_cycle = false;

        let mut first_error: Option<anyhow::Error> = None;
        let mut audited = 0usize;
        for job_id in jobs {
            info!(job_id, "Marking data collection stage complete");
            let result = async {
                self.deps
                    .store
                    .update_job(&JobUpdate {
                        id: job_id,
                        data_load_stage: Some(StageStatus::Completed),
                        data_load_end_utc: Some(completed_at),
                        ..JobUpdate::default()
                    })
                    .await
                    .context("job update failed")?;

                let audit_message = AuditMessage::new(job_id, completed_at);
                self.cleaning_publisher
                    .publish(&serde_json::to_value(&audit_message)?)
                    .await
                    .context("cleaning-stage publish failed")?;
                anyhow::Ok(())
            }
            .await;

            match result {
                Ok(()) => audited += 1,
                Err(e) => {
                    error!(job_id, error = %e, "Audit failed for job");
                    first_error.get_or_insert(e.context(format!("audit failed for job {job_id}")));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(audited),
        }
    }
}

/// Decode, resolve, execute. Returns the job id to record on success.
async fn handle_message(
    registry: &WorkflowRegistry,
    deps: &EngineDeps,
    data: &[u8],
    delivery_attempts: i64,
    message_id: &str,
) -> anyhow::Result<i64> {
    let task: TaskRecord =
        serde_json::from_slice(data).context("task message did not match the envelope schema")?;

    let workflow = registry.get(task.source, task.workflow_type, deps)?;
    let ctx = ExecuteContext {
        message_id: message_id.to_string(),
        delivery_attempts,
        job_id: task.job_id,
        task_id: task.id,
        source: task.source,
        url: task.url,
    };
    workflow.execute(&ctx).await?;
    Ok(task.job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use debtrace_bus::MemoryBroker;
    use debtrace_common::{Source, TaskRequest, WorkflowType};
    use debtrace_workflows::testing::{MockFetcher, MockStore};

    const TASKS_TOPIC: &str = "data-retrieval";
    const CLEANING_TOPIC: &str = "data-cleaning";

    /// Canned ADB site: one search page pointing at a second, each
    /// listing one project, plus both print-view detail pages.
    fn adb_site() -> MockFetcher {
        let page0 = r#"
            <ul><li class="pager-last"><a href="/projects?page=1">Last</a></li></ul>
            <div class="list"><div class="item"><a href="/projects/50001-001">A</a></div></div>"#;
        let page1 = r#"
            <div class="list"><div class="item"><a href="/projects/50002-001">B</a></div></div>"#;
        let detail = |name: &str, number: &str| {
            format!(
                r#"<table>
                     <tr><td>Project Name</td><td>{name}</td></tr>
                     <tr><td>Project Number</td><td>{number}</td></tr>
                     <tr><td>Project Status</td><td>Active</td></tr>
                     <tr><td>Country / Economy</td><td>Nepal</td></tr>
                   </table>"#
            )
        };
        MockFetcher::new()
            .on_page("https://www.adb.org/projects?page=0", page0)
            .on_page("https://www.adb.org/projects?page=1", page1)
            .on_page(
                "https://www.adb.org/print/projects/50001-001/main",
                detail("Rural Roads", "50001-001"),
            )
            .on_page(
                "https://www.adb.org/print/projects/50002-001/main",
                detail("Grid Upgrade", "50002-001"),
            )
    }

    async fn seed_starter_task(
        broker: &MemoryBroker,
        store: &MockStore,
        job_id: i64,
    ) {
        use debtrace_store::TaskStore;
        let created = store
            .bulk_create_tasks(&[TaskRequest::new(
                job_id,
                Source::Adb,
                "",
                WorkflowType::SeedUrls,
            )])
            .await
            .unwrap();
        let publisher = broker.publisher(TASKS_TOPIC);
        for task in created {
            use debtrace_bus::Publisher as _;
            publisher
                .publish(&serde_json::to_value(&task).unwrap())
                .await
                .unwrap();
        }
    }

    fn dispatcher(broker: &MemoryBroker, store: Arc<MockStore>, fetcher: Arc<MockFetcher>) -> Dispatcher {
        let deps = EngineDeps {
            fetcher,
            store,
            publisher: Arc::new(broker.publisher(TASKS_TOPIC)),
            config_dir: "config".to_string(),
        };
        Dispatcher::new(
            Arc::new(broker.subscriber(TASKS_TOPIC, 10, Duration::from_secs(30))),
            Arc::new(broker.publisher(CLEANING_TOPIC)),
            Arc::new(WorkflowRegistry::standard()),
            deps,
            4,
        )
    }

    #[tokio::test]
    async fn full_chain_processes_audits_and_drains_the_topic() {
        let broker = MemoryBroker::new();
        let store = Arc::new(MockStore::new());
        let fetcher = Arc::new(adb_site());
        seed_starter_task(&broker, &store, 1).await;

        let mut dispatcher = dispatcher(&broker, store.clone(), fetcher);

        // seed → 2 results pages → 2 project pages → quiescence.
        let mut audited = None;
        for _ in 0..10 {
            match dispatcher.run_cycle().await.unwrap() {
                CycleOutcome::Audited(jobs) => {
                    audited = Some(jobs);
                    break;
                }
                CycleOutcome::Processed(_) => {}
                CycleOutcome::Idle => panic!("went idle before auditing"),
            }
        }
        assert_eq!(audited, Some(1));

        // Every message acked; both detail pages staged.
        assert_eq!(broker.outstanding(TASKS_TOPIC).await, 0);
        let staged = store.staged_projects.lock().unwrap();
        assert_eq!(staged.len(), 2);
        assert!(staged.iter().all(|p| p.bank == "ADB"));

        // One audit message for the one job, stamped Completed.
        assert_eq!(broker.outstanding(CLEANING_TOPIC).await, 1);
        let updates = store.job_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id, 1);
        assert_eq!(updates[0].data_load_stage, Some(StageStatus::Completed));
        assert!(updates[0].data_load_end_utc.is_some());
    }

    #[tokio::test]
    async fn audit_fires_once_then_the_loop_goes_idle() {
        let broker = MemoryBroker::new();
        let store = Arc::new(MockStore::new());
        let fetcher = Arc::new(adb_site());
        seed_starter_task(&broker, &store, 7).await;

        let mut dispatcher = dispatcher(&broker, store.clone(), fetcher);
        let mut audits = 0;
        for _ in 0..12 {
            match dispatcher.run_cycle().await.unwrap() {
                CycleOutcome::Audited(_) => audits += 1,
                CycleOutcome::Processed(_) | CycleOutcome::Idle => {}
            }
        }
        assert_eq!(audits, 1);
        assert_eq!(broker.outstanding(CLEANING_TOPIC).await, 1);
    }

    #[tokio::test]
    async fn failed_message_is_left_unacked() {
        let broker = MemoryBroker::new();
        let store = Arc::new(MockStore::new());
        // No canned pages: the seed fetch 404s and the workflow fails.
        let fetcher = Arc::new(MockFetcher::new());
        seed_starter_task(&broker, &store, 3).await;

        let mut dispatcher = dispatcher(&broker, store.clone(), fetcher);
        assert_eq!(dispatcher.run_cycle().await.unwrap(), CycleOutcome::Processed(1));

        // Unacked: still outstanding, and the task row recorded the error.
        assert_eq!(broker.outstanding(TASKS_TOPIC).await, 1);
        let update = store.last_task_update();
        assert_eq!(update.status, Some(StageStatus::Error));
    }

    #[tokio::test]
    async fn undecodable_message_is_not_acked() {
        let broker = MemoryBroker::new();
        let store = Arc::new(MockStore::new());
        {
            use debtrace_bus::Publisher as _;
            broker
                .publisher(TASKS_TOPIC)
                .publish(&serde_json::json!({ "nonsense": true }))
                .await
                .unwrap();
        }

        let mut dispatcher = dispatcher(&broker, store, Arc::new(MockFetcher::new()));
        assert_eq!(dispatcher.run_cycle().await.unwrap(), CycleOutcome::Processed(1));
        assert_eq!(broker.outstanding(TASKS_TOPIC).await, 1);
    }
}
