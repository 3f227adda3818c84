//! JSON-over-HTTP gateway to the canonical data store.

pub mod client;
pub mod error;
pub mod records;
pub mod traits;

pub use client::{StoreClient, DEFAULT_BATCH_SIZE};
pub use error::{Result, StoreError};
pub use records::{
    Bank, Company, CountryRecord, Form, Investment, Project, ProjectCountry, ProjectSector,
    SectorRecord,
};
pub use traits::{TaskStore, TransformStore};

#[cfg(test)]
mod tests {
    use super::*;
    use debtrace_common::{JobType, Source, StagedProject, TaskRequest, WorkflowType};
    use wiremock::matchers::{body_partial_json, method, path, path_regex};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn staged(url: &str) -> StagedProject {
        StagedProject {
            bank: "BIO".to_string(),
            url: url.to_string(),
            ..StagedProject::default()
        }
    }

    #[tokio::test]
    async fn create_job_reports_idempotent_reuse() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pipeline/jobs"))
            .and(body_partial_json(serde_json::json!({
                "invocation_id": "nightly-abc123",
                "job_type": "dev-bank-projects",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 31,
                "invocation_id": "nightly-abc123",
                "job_type": "dev-bank-projects",
            })))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let (id, was_created) = store
            .create_job("nightly-abc123", JobType::DevBankProjects)
            .await
            .unwrap();
        assert_eq!(id, 31);
        assert!(!was_created, "200 means the job already existed");
    }

    #[tokio::test]
    async fn bulk_create_tasks_returns_only_new_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pipeline/tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([
                { "id": 5, "job_id": 1, "source": "adb",
                  "workflow_type": "results-page", "url": "https://www.adb.org/projects?page=0" }
            ])))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let requests = vec![
            TaskRequest::new(1, Source::Adb, "https://www.adb.org/projects?page=0", WorkflowType::ResultsPage),
            TaskRequest::new(1, Source::Adb, "https://www.adb.org/projects?page=1", WorkflowType::ResultsPage),
        ];
        let created = store.bulk_create_tasks(&requests).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, 5);
        assert_eq!(created[0].workflow_type, WorkflowType::ResultsPage);
    }

    #[tokio::test]
    async fn fifteen_hundred_one_records_make_exactly_two_batches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pipeline/staged-projects"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([])))
            .expect(2)
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let records: Vec<StagedProject> = (0..1501)
            .map(|i| staged(&format!("https://www.bio-invest.be/en/investments/project-{i}")))
            .collect();
        store.bulk_insert_staged_projects(&records).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let sizes: Vec<usize> = received
            .iter()
            .map(|r: &Request| {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                body["records"].as_array().unwrap().len()
            })
            .collect();
        assert_eq!(sizes, vec![1000, 501]);
    }

    #[tokio::test]
    async fn empty_bulk_insert_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        assert_eq!(store.bulk_insert_staged_projects(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn association_insert_distinguishes_created_from_existing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/countries/project-countries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "project_id": 1, "country_id": 2 }
            ])))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let (count, created) = store
            .bulk_insert_project_countries(&[ProjectCountry {
                project_id: 1,
                country_id: 2,
            }])
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(!created, "200 means every pair already existed");
    }

    #[tokio::test]
    async fn store_fault_statuses_become_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path_regex(r"^/api/pipeline/tasks/\d+$"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let update = debtrace_common::TaskUpdate::begin(9, 1);
        match store.update_task(&update).await {
            Err(StoreError::Api { status, message, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_staged_projects_sends_ids_and_parses_count() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/pipeline/staged-projects"))
            .and(body_partial_json(serde_json::json!({ "ids": [3, 4, 5] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(3)))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        assert_eq!(store.delete_staged_projects(&[3, 4, 5]).await.unwrap(), 3);
    }
}
