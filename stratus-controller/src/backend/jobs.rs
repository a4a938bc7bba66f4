//! Local execution of jobs as Kubernetes batch Jobs

use async_trait::async_trait;
use serde_json::Value;
use stratus_core::domain::job::{ExecutionPhase, Job};
use stratus_core::domain::service::Service;

use crate::error::{Result, SchedError};
use crate::kube::manifest::{self, JOB_LABEL};
use crate::kube::{KubeApi, paths};

/// Runs jobs on the local cluster
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn submit(&self, service: &Service, job: &Job) -> Result<()>;

    /// Removes the execution; `NotFound` when there is none
    async fn withdraw(&self, job: &Job) -> Result<()>;

    async fn phase(&self, job: &Job) -> Result<ExecutionPhase>;

    /// Output of every pod the execution ran; `NotFound` when there is none
    async fn logs(&self, job: &Job) -> Result<String>;
}

pub struct KubeJobRunner {
    api: KubeApi,
    namespace: String,
}

impl KubeJobRunner {
    pub fn new(api: KubeApi, namespace: &str) -> Self {
        Self {
            api,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl JobRunner for KubeJobRunner {
    async fn submit(&self, service: &Service, job: &Job) -> Result<()> {
        let body = manifest::batch_job(service, job, &self.namespace);
        self.api.create(&paths::jobs(&self.namespace), &body).await?;
        tracing::debug!(job_id = %job.id, name = %job.execution_name(), "Batch job created");
        Ok(())
    }

    async fn withdraw(&self, job: &Job) -> Result<()> {
        self.api
            .delete(&paths::job(&self.namespace, &job.execution_name()))
            .await?;
        Ok(())
    }

    async fn phase(&self, job: &Job) -> Result<ExecutionPhase> {
        let object: Value = match self
            .api
            .get(&paths::job(&self.namespace, &job.execution_name()))
            .await
        {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Ok(ExecutionPhase::Missing),
            Err(e) => return Err(e.into()),
        };

        let selector = format!("{}={}", JOB_LABEL, job.id);
        let pods = self
            .api
            .list(
                &paths::pods(&self.namespace),
                &[("labelSelector", selector.as_str())],
            )
            .await?;

        Ok(phase_of(&object, &pods))
    }

    async fn logs(&self, job: &Job) -> Result<String> {
        let selector = format!("{}={}", JOB_LABEL, job.id);
        let pods = self
            .api
            .list(
                &paths::pods(&self.namespace),
                &[("labelSelector", selector.as_str())],
            )
            .await?;

        let names: Vec<&str> = pods
            .iter()
            .filter_map(|pod| pod.pointer("/metadata/name").and_then(Value::as_str))
            .collect();
        if names.is_empty() {
            return Err(SchedError::NotFound(format!("no pods for job {}", job.id)));
        }

        // Retried pods each get a header
        let labelled = names.len() > 1;
        let mut output = String::new();
        for name in names {
            let log = self
                .api
                .get_text(&paths::pod_log(&self.namespace, name), &[])
                .await?;
            if labelled {
                output.push_str(&format!("==> {} <==\n", name));
            }
            output.push_str(&log);
        }
        Ok(output)
    }
}

fn status_count(job: &Value, field: &str) -> u64 {
    job.pointer(&format!("/status/{}", field))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Execution phase of a batch Job and its pods
///
/// A Job counts its pods as `active` before they are scheduled, so a job
/// is only `Running` once one of its pods left the `Pending` phase.
pub fn phase_of(job: &Value, pods: &[Value]) -> ExecutionPhase {
    if status_count(job, "succeeded") > 0 {
        return ExecutionPhase::Succeeded;
    }
    if status_count(job, "failed") > 0 {
        return ExecutionPhase::Failed;
    }

    let started = pods.iter().any(|pod| {
        matches!(
            pod.pointer("/status/phase").and_then(Value::as_str),
            Some("Running") | Some("Succeeded") | Some("Failed")
        )
    });

    if started {
        ExecutionPhase::Running
    } else {
        ExecutionPhase::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_phase_of() {
        let job = json!({ "status": { "active": 1 } });
        let pending = json!({ "status": { "phase": "Pending" } });
        let running = json!({ "status": { "phase": "Running" } });

        assert_eq!(phase_of(&job, &[]), ExecutionPhase::Pending);
        assert_eq!(phase_of(&job, &[pending.clone()]), ExecutionPhase::Pending);
        assert_eq!(phase_of(&job, &[pending, running]), ExecutionPhase::Running);
        assert_eq!(
            phase_of(&json!({ "status": { "succeeded": 1 } }), &[]),
            ExecutionPhase::Succeeded
        );
        assert_eq!(
            phase_of(&json!({ "status": { "failed": 1 } }), &[]),
            ExecutionPhase::Failed
        );
    }

    #[tokio::test]
    async fn test_missing_job() {
        let server = MockServer::start().await;
        let job = Job::new("grayify", "");
        Mock::given(method("GET"))
            .and(path(paths::job("svc", &job.execution_name())))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "not found" })))
            .mount(&server)
            .await;

        let runner = KubeJobRunner::new(KubeApi::new(server.uri(), None).unwrap(), "svc");
        assert_eq!(runner.phase(&job).await.unwrap(), ExecutionPhase::Missing);
    }

    #[tokio::test]
    async fn test_logs_of_job_pod() {
        let server = MockServer::start().await;
        let job = Job::new("grayify", "");
        Mock::given(method("GET"))
            .and(path(paths::pods("svc")))
            .and(query_param("labelSelector", format!("{}={}", JOB_LABEL, job.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "metadata": { "name": "grayify-1-abcde" } }],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(paths::pod_log("svc", "grayify-1-abcde")))
            .respond_with(ResponseTemplate::new(200).set_body_string("converted in/a.png\n"))
            .mount(&server)
            .await;

        let runner = KubeJobRunner::new(KubeApi::new(server.uri(), None).unwrap(), "svc");
        assert_eq!(runner.logs(&job).await.unwrap(), "converted in/a.png\n");
    }

    #[tokio::test]
    async fn test_logs_without_pods() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(paths::pods("svc")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .mount(&server)
            .await;

        let runner = KubeJobRunner::new(KubeApi::new(server.uri(), None).unwrap(), "svc");
        let err = runner.logs(&Job::new("grayify", "")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_running_job() {
        let server = MockServer::start().await;
        let job = Job::new("grayify", "");
        Mock::given(method("GET"))
            .and(path(paths::job("svc", &job.execution_name())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": { "active": 1 } })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(paths::pods("svc")))
            .and(query_param("labelSelector", format!("{}={}", JOB_LABEL, job.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "status": { "phase": "Running" } }],
            })))
            .mount(&server)
            .await;

        let runner = KubeJobRunner::new(KubeApi::new(server.uri(), None).unwrap(), "svc");
        assert_eq!(runner.phase(&job).await.unwrap(), ExecutionPhase::Running);
    }
}
