//! Job-related API endpoints

use crate::ClusterClient;
use crate::error::Result;
use reqwest::Method;
use stratus_core::domain::job::Job;
use stratus_core::dto::job::{AdmitResponse, DELEGATED_HEADER, DeletedJobs, JobDetails};
use uuid::Uuid;

impl ClusterClient {
    // =============================================================================
    // Job Admission
    // =============================================================================

    /// Admit an asynchronous invocation of `service`
    ///
    /// The remote control plane is free to delegate it further.
    pub async fn admit_job(&self, service: &str, payload: impl Into<String>) -> Result<AdmitResponse> {
        let path = format!("/job/{}", service);
        let response = self
            .request(Method::POST, &path)
            .body(payload.into())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Submit a job delegated by the control plane named `origin`
    ///
    /// The remote admits it pinned: it runs there and is never delegated
    /// onwards.
    pub async fn submit_delegated_job(
        &self,
        service: &str,
        payload: impl Into<String>,
        origin: &str,
    ) -> Result<AdmitResponse> {
        let path = format!("/job/{}", service);
        let response = self
            .request(Method::POST, &path)
            .header(DELEGATED_HEADER, origin)
            .body(payload.into())
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Job Inspection
    // =============================================================================

    /// Get a job and its observed execution phase
    pub async fn get_job(&self, job_id: Uuid) -> Result<JobDetails> {
        let path = format!("/system/jobs/{}", job_id);
        let response = self.request(Method::GET, &path).send().await?;

        self.handle_response(response).await
    }

    /// List jobs, optionally only those of one service
    pub async fn list_jobs(&self, service: Option<&str>) -> Result<Vec<Job>> {
        let mut builder = self.request(Method::GET, "/system/jobs");
        if let Some(service) = service {
            builder = builder.query(&[("service", service)]);
        }
        let response = builder.send().await?;

        self.handle_response(response).await
    }

    /// Output of the job's execution, wherever it ran
    pub async fn get_job_logs(&self, job_id: Uuid) -> Result<String> {
        let path = format!("/system/jobs/{}/logs", job_id);
        let response = self.request(Method::GET, &path).send().await?;
        let response = Self::check_status(response).await?;

        Ok(response.text().await?)
    }

    // =============================================================================
    // Job Removal
    // =============================================================================

    /// Withdraw a job from its cluster and delete its record
    pub async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        let path = format!("/system/jobs/{}", job_id);
        let response = self.request(Method::DELETE, &path).send().await?;

        self.handle_empty_response(response).await
    }

    /// Delete the finished jobs of `service`, or all of them with `all`
    pub async fn delete_jobs(&self, service: &str, all: bool) -> Result<DeletedJobs> {
        let mut query = vec![("service", service)];
        if all {
            query.push(("all", "true"));
        }
        let response = self
            .request(Method::DELETE, "/system/jobs")
            .query(&query)
            .send()
            .await?;

        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_submit_delegated_job_marks_origin() {
        let server = MockServer::start().await;
        let job_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/job/grayify"))
            .and(header(DELEGATED_HEADER, "central"))
            .and(body_string("{\"key\":\"in/cat.png\"}"))
            .respond_with(ResponseTemplate::new(202).set_body_json(AdmitResponse { job_id }))
            .expect(1)
            .mount(&server)
            .await;

        let client = ClusterClient::new(server.uri());
        let admitted = client
            .submit_delegated_job("grayify", "{\"key\":\"in/cat.png\"}", "central")
            .await
            .unwrap();
        assert_eq!(admitted.job_id, job_id);
    }

    #[tokio::test]
    async fn test_admit_unknown_service_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/job/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("service not found"))
            .mount(&server)
            .await;

        let err = ClusterClient::new(server.uri())
            .admit_job("missing", "")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/job/grayify"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = ClusterClient::new(server.uri())
            .submit_delegated_job("grayify", "", "central")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_service() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/system/jobs"))
            .and(query_param("service", "grayify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<Job>::new()))
            .expect(1)
            .mount(&server)
            .await;

        let jobs = ClusterClient::new(server.uri())
            .list_jobs(Some("grayify"))
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_get_job_logs_returns_text() {
        let server = MockServer::start().await;
        let job_id = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/system/jobs/{}/logs", job_id)))
            .respond_with(ResponseTemplate::new(200).set_body_string("done\n"))
            .mount(&server)
            .await;

        let logs = ClusterClient::new(server.uri())
            .get_job_logs(job_id)
            .await
            .unwrap();
        assert_eq!(logs, "done\n");
    }

    #[tokio::test]
    async fn test_delete_jobs_of_service() {
        let server = MockServer::start().await;
        let deleted = vec![Uuid::new_v4()];

        Mock::given(method("DELETE"))
            .and(path("/system/jobs"))
            .and(query_param("service", "grayify"))
            .and(query_param("all", "true"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(DeletedJobs {
                    deleted: deleted.clone(),
                }),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = ClusterClient::new(server.uri())
            .delete_jobs("grayify", true)
            .await
            .unwrap();
        assert_eq!(response.deleted, deleted);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_transient() {
        // Port 9 (discard) is not expected to accept HTTP connections
        let client = ClusterClient::with_timeout(
            "http://127.0.0.1:9",
            std::time::Duration::from_millis(200),
        )
        .unwrap();

        let err = client.delete_job(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
