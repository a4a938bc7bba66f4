//! Capacity of the local cluster derived from nodes and pods

use serde_json::Value;
use std::collections::HashMap;
use stratus_core::domain::cluster::BackendKind;
use stratus_core::dto::cluster::ClusterInfo;

use super::manifest::GPU_RESOURCE;
use super::quantity;
use super::{KubeApi, KubeResult, paths};

const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

#[derive(Debug, Default, Clone, Copy)]
struct Amounts {
    cpu_millis: u64,
    memory_bytes: u64,
    gpu: u32,
}

impl Amounts {
    fn read(resources: Option<&Value>) -> Self {
        let get = |key: &str| {
            resources
                .and_then(|r| r.get(key))
                .and_then(Value::as_str)
                .unwrap_or("0")
                .to_string()
        };
        Self {
            cpu_millis: quantity::cpu_millis(&get("cpu")).unwrap_or(0),
            memory_bytes: quantity::memory_bytes(&get("memory")).unwrap_or(0),
            gpu: quantity::count(&get(GPU_RESOURCE)).unwrap_or(0),
        }
    }

    fn add(&mut self, other: Amounts) {
        self.cpu_millis += other.cpu_millis;
        self.memory_bytes += other.memory_bytes;
        self.gpu += other.gpu;
    }
}

/// Fetches nodes and pods and summarizes the cluster's capacity
pub async fn cluster_info(
    api: &KubeApi,
    name: &str,
    backend: BackendKind,
) -> KubeResult<ClusterInfo> {
    let nodes = api.list(paths::NODES, &[]).await?;
    let pods = api
        .list(
            paths::ALL_PODS,
            &[("fieldSelector", "status.phase!=Succeeded,status.phase!=Failed")],
        )
        .await?;
    Ok(summarize(name, backend, &nodes, &pods))
}

fn is_worker(node: &Value) -> bool {
    let labels = node.pointer("/metadata/labels");
    let control_plane = CONTROL_PLANE_LABELS
        .iter()
        .any(|label| labels.and_then(|l| l.get(*label)).is_some());
    let unschedulable = node
        .pointer("/spec/unschedulable")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    !control_plane && !unschedulable
}

fn is_terminal_pod(pod: &Value) -> bool {
    matches!(
        pod.pointer("/status/phase").and_then(Value::as_str),
        Some("Succeeded") | Some("Failed")
    )
}

fn pod_requests(pod: &Value) -> Amounts {
    let mut total = Amounts::default();
    if let Some(Value::Array(containers)) = pod.pointer("/spec/containers") {
        for container in containers {
            total.add(Amounts::read(container.pointer("/resources/requests")));
        }
    }
    total
}

/// Allocatable capacity of worker nodes minus requests of live pods on them
pub fn summarize(name: &str, backend: BackendKind, nodes: &[Value], pods: &[Value]) -> ClusterInfo {
    let mut used: HashMap<&str, Amounts> = HashMap::new();
    for pod in pods.iter().filter(|p| !is_terminal_pod(p)) {
        if let Some(node) = pod.pointer("/spec/nodeName").and_then(Value::as_str) {
            used.entry(node).or_default().add(pod_requests(pod));
        }
    }

    let mut info = ClusterInfo {
        name: name.to_string(),
        backend: Some(backend),
        ..Default::default()
    };

    for node in nodes.iter().filter(|n| is_worker(n)) {
        let allocatable = Amounts::read(node.pointer("/status/allocatable"));
        let node_name = node
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let used = used.get(node_name).copied().unwrap_or_default();

        info.nodes += 1;
        info.total_cpu_millis += allocatable.cpu_millis;
        info.total_memory_bytes += allocatable.memory_bytes;
        info.total_gpu += allocatable.gpu;
        info.free_cpu_millis += allocatable.cpu_millis.saturating_sub(used.cpu_millis);
        info.free_memory_bytes += allocatable.memory_bytes.saturating_sub(used.memory_bytes);
        info.free_gpu += allocatable.gpu.saturating_sub(used.gpu);
    }

    info
}
