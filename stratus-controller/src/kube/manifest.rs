//! Object manifests for services and their executions

use serde_json::{Value, json};
use stratus_core::domain::job::Job;
use stratus_core::domain::service::Service;

use super::quantity::format_cpu;

pub const SERVICE_LABEL: &str = "stratus_service";
pub const JOB_LABEL: &str = "stratus_job";
pub const DEFINITION_KEY: &str = "service.json";
pub const SCRIPT_KEY: &str = "script.sh";
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// ConfigMap holding a service definition and its script
pub fn definition_config_map(service: &Service, namespace: &str) -> serde_json::Result<Value> {
    let definition = serde_json::to_string(service)?;
    Ok(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": service.name,
            "namespace": namespace,
            "labels": { SERVICE_LABEL: service.name },
        },
        "data": {
            DEFINITION_KEY: definition,
            SCRIPT_KEY: service.script,
        },
    }))
}

/// Container resources block for a service's request
pub fn resources(service: &Service) -> Value {
    let request = &service.resources;
    let mut amounts = json!({
        "cpu": format_cpu(request.cpu_millis),
        "memory": request.memory_bytes.to_string(),
    });
    if let Some(gpu) = request.gpu {
        amounts[GPU_RESOURCE] = json!(gpu.to_string());
    }
    json!({ "requests": amounts.clone(), "limits": amounts })
}

fn environment(service: &Service, job: Option<&Job>) -> Vec<Value> {
    let mut env: Vec<Value> = service
        .environment
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    env.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    if let Some(job) = job {
        env.push(json!({ "name": "EVENT", "value": job.payload }));
        env.push(json!({ "name": "STRATUS_JOB_ID", "value": job.id.to_string() }));
    }
    env
}

/// Batch Job executing one invocation of a service
pub fn batch_job(service: &Service, job: &Job, namespace: &str) -> Value {
    let labels = json!({
        SERVICE_LABEL: service.name,
        JOB_LABEL: job.id.to_string(),
    });

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job.execution_name(),
            "namespace": namespace,
            "labels": labels.clone(),
        },
        "spec": {
            "backoffLimit": 0,
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "stratus-job",
                        "image": service.image,
                        "command": ["/bin/sh", "-c", service.script],
                        "env": environment(service, Some(job)),
                        "resources": resources(service),
                    }],
                },
            },
        },
    })
}

/// Knative Service serving synchronous invocations
pub fn knative_service(service: &Service, namespace: &str) -> Value {
    json!({
        "apiVersion": "serving.knative.dev/v1",
        "kind": "Service",
        "metadata": {
            "name": service.name,
            "namespace": namespace,
            "labels": { SERVICE_LABEL: service.name },
        },
        "spec": {
            "template": {
                "spec": {
                    "containerConcurrency": 1,
                    "containers": [{
                        "image": service.image,
                        "command": ["/bin/sh", "-c", service.script],
                        "env": environment(service, None),
                        "resources": resources(service),
                    }],
                },
            },
        },
    })
}

/// OpenFaaS gateway deployment request
pub fn openfaas_function(service: &Service, namespace: &str) -> Value {
    let mut env = serde_json::Map::new();
    for (name, value) in &service.environment {
        env.insert(name.clone(), json!(value));
    }
    env.insert("fprocess".to_string(), json!(service.script));

    json!({
        "service": service.name,
        "image": service.image,
        "namespace": namespace,
        "envProcess": service.script,
        "envVars": env,
        "labels": { SERVICE_LABEL: service.name },
        "limits": {
            "cpu": format_cpu(service.resources.cpu_millis),
            "memory": service.resources.memory_bytes.to_string(),
        },
        "requests": {
            "cpu": format_cpu(service.resources.cpu_millis),
            "memory": service.resources.memory_bytes.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::domain::service::ResourceRequest;

    fn service() -> Service {
        serde_json::from_value(json!({
            "name": "grayify",
            "image": "ghcr.io/example/grayify",
            "script": "convert $EVENT",
            "resources": { "cpu_millis": 500, "memory_bytes": 1048576, "gpu": 1 },
            "environment": { "B": "2", "A": "1" },
        }))
        .unwrap()
    }

    #[test]
    fn test_batch_job() {
        let service = service();
        let job = Job::new("grayify", "{\"Key\":\"in/cat.png\"}");
        let manifest = batch_job(&service, &job, "stratus-svc");

        assert_eq!(manifest["metadata"]["name"], job.execution_name());
        assert_eq!(manifest["metadata"]["labels"][JOB_LABEL], job.id.to_string());

        let container = &manifest["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], "ghcr.io/example/grayify");
        assert_eq!(container["resources"]["requests"]["cpu"], "500m");
        assert_eq!(container["resources"]["limits"][GPU_RESOURCE], "1");

        let env = container["env"].as_array().unwrap();
        assert_eq!(env[0]["name"], "A");
        assert!(env.iter().any(|e| e["name"] == "EVENT" && e["value"] == job.payload));
    }

    #[test]
    fn test_definition_round_trips_through_config_map() {
        let service = service();
        let cm = definition_config_map(&service, "stratus-svc").unwrap();
        let stored: Service =
            serde_json::from_str(cm["data"][DEFINITION_KEY].as_str().unwrap()).unwrap();
        assert_eq!(stored, service);
    }

    #[test]
    fn test_resources_without_gpu() {
        let mut service = service();
        service.resources = ResourceRequest {
            cpu_millis: 1000,
            memory_bytes: 2048,
            gpu: None,
        };
        let res = resources(&service);
        assert!(res["limits"].get(GPU_RESOURCE).is_none());
        assert_eq!(res["requests"]["memory"], "2048");
    }
}
