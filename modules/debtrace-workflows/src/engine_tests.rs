//! Engine tests: the shared choreography against mock seams.
//!
//! MOCK → FUNCTION → OUTPUT: set up the fake world, call `execute` on
//! a real `Workflow`, assert the task updates, staged rows, and bus
//! traffic that came out.

use std::sync::Arc;

use async_trait::async_trait;

use debtrace_common::{Source, StageStatus, StagedProject, WorkflowType};

use crate::engine::{ExecuteContext, Workflow};
use crate::error::{Result, WorkflowError};
use crate::strategies::{FilingHistoryStrategy, ProjectScrapeStrategy, SeedStrategy};
use crate::testing::{MockPublisher, MockStore};

fn ctx(task_id: i64, source: Source) -> ExecuteContext {
    ExecuteContext {
        message_id: "m-100".to_string(),
        delivery_attempts: 1,
        job_id: 1,
        task_id,
        source,
        url: String::new(),
    }
}

struct StubSeeder {
    urls: Vec<String>,
}

#[async_trait]
impl SeedStrategy for StubSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        Ok(self.urls.clone())
    }
}

struct FailingSeeder;

#[async_trait]
impl SeedStrategy for FailingSeeder {
    async fn seed_urls(&self) -> Result<Vec<String>> {
        Err(WorkflowError::scrape("pagination control not found"))
    }
}

struct StubProjectScraper {
    records: Vec<StagedProject>,
}

#[async_trait]
impl ProjectScrapeStrategy for StubProjectScraper {
    async fn scrape_project_page(&self, _url: &str) -> Result<Vec<StagedProject>> {
        Ok(self.records.clone())
    }
}

struct StubFilingHistory {
    recent: usize,
    archived: usize,
}

#[async_trait]
impl FilingHistoryStrategy for StubFilingHistory {
    async fn scrape_filing_history(&self, _url: &str) -> Result<(Vec<String>, Vec<String>)> {
        let recent = (0..self.recent)
            .map(|i| format!("https://www.sec.gov/Archives/edgar/data/100/{i}-index.htm"))
            .collect();
        let archived = (0..self.archived)
            .map(|i| format!("https://data.sec.gov/submissions/CIK0000000100-submissions-{i:03}.json"))
            .collect();
        Ok((recent, archived))
    }
}

fn project(url: &str) -> StagedProject {
    StagedProject {
        bank: "ADB".to_string(),
        url: url.to_string(),
        ..StagedProject::default()
    }
}

#[tokio::test]
async fn seed_publishes_one_message_per_created_task() {
    let store = Arc::new(MockStore::new());
    let publisher = Arc::new(MockPublisher::new());
    let seeder = StubSeeder {
        urls: vec![
            "https://www.adb.org/projects?page=0".to_string(),
            "https://www.adb.org/projects?page=1".to_string(),
            "https://www.adb.org/projects?page=2".to_string(),
        ],
    };

    let workflow = Workflow::seed(
        Arc::new(seeder),
        WorkflowType::ResultsPage,
        store.clone(),
        publisher.clone(),
    );
    workflow.execute(&ctx(10, Source::Adb)).await.unwrap();

    assert_eq!(store.created_task_count(), 3);
    assert_eq!(publisher.published_count(), 3);
    for message in publisher.published.lock().unwrap().iter() {
        assert_eq!(message["workflow_type"], "results-page");
        assert_eq!(message["source"], "adb");
    }

    let update = store.last_task_update();
    assert_eq!(update.id, 10);
    assert_eq!(update.status, Some(StageStatus::Completed));
    assert!(update.processing_end_utc.is_some());
    assert!(update.scraping_start_utc.is_some());
    assert!(update.scraping_end_utc.is_some());
}

#[tokio::test]
async fn re_execution_creates_and_publishes_nothing_new() {
    let store = Arc::new(MockStore::new());
    let publisher = Arc::new(MockPublisher::new());
    let seeder = StubSeeder {
        urls: vec!["https://www.adb.org/projects?page=0".to_string()],
    };

    let workflow = Workflow::seed(
        Arc::new(seeder),
        WorkflowType::ResultsPage,
        store.clone(),
        publisher.clone(),
    );
    workflow.execute(&ctx(10, Source::Adb)).await.unwrap();
    workflow.execute(&ctx(10, Source::Adb)).await.unwrap();

    // The second run hit the conflict-ignore path: same row, no message.
    assert_eq!(store.created_task_count(), 1);
    assert_eq!(publisher.published_count(), 1);
}

#[tokio::test]
async fn failure_records_error_update_and_reraises() {
    let store = Arc::new(MockStore::new());
    let publisher = Arc::new(MockPublisher::new());

    let workflow = Workflow::seed(
        Arc::new(FailingSeeder),
        WorkflowType::ResultsPage,
        store.clone(),
        publisher.clone(),
    );
    let err = workflow
        .execute(&ctx(11, Source::Adb))
        .await
        .expect_err("seeder failure must propagate");

    // Error text is prefixed with the workflow kind and message id.
    let text = err.to_string();
    assert!(text.starts_with("Seed URL generation workflow failed for message m-100."));
    assert!(text.contains("pagination control not found"));

    let update = store.last_task_update();
    assert_eq!(update.status, Some(StageStatus::Error));
    assert!(update.last_failed_at_utc.is_some());
    assert_eq!(update.last_error_message.as_deref(), Some(text.as_str()));
    assert_eq!(publisher.published_count(), 0);
}

#[tokio::test]
async fn retry_count_tracks_delivery_attempts() {
    let store = Arc::new(MockStore::new());
    let publisher = Arc::new(MockPublisher::new());
    let workflow = Workflow::seed(
        Arc::new(StubSeeder { urls: vec![] }),
        WorkflowType::ResultsPage,
        store.clone(),
        publisher,
    );

    let mut context = ctx(12, Source::Adb);
    context.delivery_attempts = 4;
    workflow.execute(&context).await.unwrap();

    assert_eq!(store.last_task_update().retry_count, Some(3));
}

#[tokio::test]
async fn terminal_workflow_persists_records_and_publishes_nothing() {
    let store = Arc::new(MockStore::new());
    let publisher = Arc::new(MockPublisher::new());
    let scraper = StubProjectScraper {
        records: vec![
            project("https://www.adb.org/projects/53303-001/main"),
            project("https://www.adb.org/projects/53303-002/main"),
        ],
    };

    let workflow = Workflow::project(Arc::new(scraper), store.clone());
    let mut context = ctx(20, Source::Adb);
    context.url = "https://www.adb.org/print/projects/53303-001/main".to_string();
    workflow.execute(&context).await.unwrap();

    let staged = store.staged_projects.lock().unwrap();
    assert_eq!(staged.len(), 2);
    assert!(staged.iter().all(|p| p.task_id == Some(20)));
    assert_eq!(store.created_task_count(), 0);
    assert_eq!(publisher.published_count(), 0);
}

#[tokio::test]
async fn empty_scrape_result_is_success_not_error() {
    let store = Arc::new(MockStore::new());
    let workflow = Workflow::project(
        Arc::new(StubProjectScraper { records: vec![] }),
        store.clone(),
    );
    workflow.execute(&ctx(21, Source::Fmo)).await.unwrap();

    assert!(store.staged_projects.lock().unwrap().is_empty());
    assert_eq!(store.last_task_update().status, Some(StageStatus::Completed));
}

#[tokio::test]
async fn filing_history_routes_recent_and_archived_differently() {
    let store = Arc::new(MockStore::new());
    let publisher = Arc::new(MockPublisher::new());
    let workflow = Workflow::filing_history(
        Arc::new(StubFilingHistory {
            recent: 2,
            archived: 3,
        }),
        store.clone(),
        publisher.clone(),
    );
    workflow.execute(&ctx(30, Source::Sec)).await.unwrap();

    let created = store.created_tasks.lock().unwrap();
    let scrapes = created
        .iter()
        .filter(|t| t.workflow_type == WorkflowType::FilingScrape)
        .count();
    let archives = created
        .iter()
        .filter(|t| t.workflow_type == WorkflowType::FilingArchive)
        .count();
    assert_eq!(scrapes, 2);
    assert_eq!(archives, 3);
    assert_eq!(publisher.published_count(), 5);
}

#[tokio::test]
async fn partial_publish_failure_fails_the_task() {
    let store = Arc::new(MockStore::new());
    let publisher = Arc::new(MockPublisher::new().fail_after(1));
    let workflow = Workflow::seed(
        Arc::new(StubSeeder {
            urls: vec![
                "https://www.fmo.nl/worldmap?page=0".to_string(),
                "https://www.fmo.nl/worldmap?page=1".to_string(),
            ],
        }),
        WorkflowType::ResultsPage,
        store.clone(),
        publisher.clone(),
    );

    let err = workflow
        .execute(&ctx(40, Source::Fmo))
        .await
        .expect_err("publish failure must propagate");
    assert!(err.to_string().contains("publish rejected"));
    assert_eq!(store.last_task_update().status, Some(StageStatus::Error));

    // The rows persist and the unacked message will be redelivered.
    assert_eq!(store.created_task_count(), 2);
    assert_eq!(publisher.published_count(), 1);
}
