//! Controller configuration
//!
//! Every field is read from a named environment variable, parsed and
//! validated where it is read. Scheduling tunables are grouped so the
//! scheduler can be built from them alone.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::json;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use stratus_core::domain::cluster::{BackendKind, ClusterDescriptor};

/// Controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Basic auth username for the `/system` routes
    pub username: String,
    /// Basic auth password for the `/system` routes
    pub password: String,
    /// Name of this control plane, sent as origin on delegated jobs
    pub name: String,
    /// Namespace the controller itself is deployed in
    pub namespace: String,
    /// Namespace for services and jobs
    pub services_namespace: String,
    pub service_port: u16,
    /// Serverless runtime; `None` allows only asynchronous invocations
    pub serverless_backend: Option<BackendKind>,
    pub openfaas: OpenfaasConfig,
    /// Kubernetes API server URL, in-cluster service account when unset
    pub kube_api_url: Option<String>,
    /// Postgres URL for the job store, in-memory store when unset
    pub database_url: Option<String>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Delegate jobs to the remote clusters; off keeps every job local
    pub resource_manager_enable: bool,
    /// Period of the cluster snapshot refresh, which always runs
    pub resource_manager_interval: Duration,
    /// Periodically move stalled jobs to better-fitting clusters
    pub rescheduler_enable: bool,
    pub rescheduler_interval: Duration,
    /// Period of the job completion sweep
    pub job_tracker_interval: Duration,
    /// How long finished jobs are kept before they are deleted
    pub job_retention: Duration,
    pub scheduling: SchedulingConfig,
    pub circuit: CircuitConfig,
    /// Remote clusters this control plane may delegate to
    pub remote_clusters: Vec<ClusterDescriptor>,
}

/// OpenFaaS gateway settings
#[derive(Debug, Clone)]
pub struct OpenfaasConfig {
    pub namespace: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Port of the Prometheus instance shipped with OpenFaaS
    pub prometheus_port: u16,
    /// Scale functions without recent invocations down to zero replicas
    pub scaler_enable: bool,
    pub scaler_interval: Duration,
    /// How long a function must go uninvoked before it is scaled down
    pub scaler_inactivity: Duration,
}

impl OpenfaasConfig {
    /// In-cluster URL of the OpenFaaS gateway
    pub fn gateway_url(&self) -> String {
        format!(
            "http://gateway.{}.svc.cluster.local:{}",
            self.namespace, self.port
        )
    }

    pub fn prometheus_url(&self) -> String {
        format!(
            "http://prometheus.{}.svc.cluster.local:{}",
            self.namespace, self.prometheus_port
        )
    }

    /// Namespace OpenFaaS deploys functions into
    pub fn functions_namespace(&self) -> String {
        format!("{}-fn", self.namespace)
    }
}

/// Tunables of the delegation algorithm and the rescheduler
#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    /// Snapshots older than this are treated as unknown
    pub snapshot_freshness: Duration,
    /// Grace period before a job that has not started is rescheduled
    pub rescheduler_threshold: Duration,
    /// Bound of every call to a cluster (create, withdraw, status)
    pub delegation_timeout: Duration,
    /// Lifetime limit of delegation attempts per job
    pub max_delegation_attempts: u32,
    pub weights: ScoreWeights,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            snapshot_freshness: Duration::from_secs(60),
            rescheduler_threshold: Duration::from_secs(30),
            delegation_timeout: Duration::from_secs(10),
            max_delegation_attempts: 5,
            weights: ScoreWeights::default(),
        }
    }
}

/// Weights of the candidate scoring function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub cpu: f64,
    pub memory: f64,
    /// Added when GPUs are requested and available
    pub gpu_bonus: f64,
    /// Subtracted from every remote candidate
    pub remote_penalty: f64,
    /// Multiplied by the service's cluster priority and subtracted
    pub priority: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            cpu: 0.5,
            memory: 0.5,
            gpu_bonus: 0.25,
            remote_penalty: 0.05,
            priority: 0.0,
        }
    }
}

/// Delegation circuit breaker settings
#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    /// Consecutive failed delegations before the cluster is excluded
    pub failure_threshold: u32,
    /// Exclusion window before a probe is allowed (half-open)
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates configuration from any name-to-value lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let config = Self {
            username: env.required("STRATUS_USERNAME")?,
            password: env.required("STRATUS_PASSWORD")?,
            name: env.lowercase("STRATUS_NAME", "stratus"),
            namespace: env.lowercase("STRATUS_NAMESPACE", "stratus"),
            services_namespace: env.lowercase("STRATUS_SERVICES_NAMESPACE", "stratus-svc"),
            service_port: env.parse("STRATUS_SERVICE_PORT", 8080)?,
            serverless_backend: env
                .raw("SERVERLESS_BACKEND")
                .map(|v| v.parse::<BackendKind>())
                .transpose()
                .map_err(|e| anyhow!("the SERVERLESS_BACKEND value is not valid: {}", e))?,
            openfaas: OpenfaasConfig {
                namespace: env.lowercase("OPENFAAS_NAMESPACE", "openfaas"),
                port: env.parse("OPENFAAS_PORT", 8080)?,
                username: env.raw("OPENFAAS_USERNAME"),
                password: env.raw("OPENFAAS_PASSWORD"),
                prometheus_port: env.parse("OPENFAAS_PROMETHEUS_PORT", 9090)?,
                scaler_enable: env.parse("OPENFAAS_SCALER_ENABLE", false)?,
                scaler_interval: env.duration("OPENFAAS_SCALER_INTERVAL", "2m")?,
                scaler_inactivity: env.duration("OPENFAAS_SCALER_INACTIVITY_DURATION", "10m")?,
            },
            kube_api_url: env.url("KUBE_API_URL")?,
            database_url: env.raw("DATABASE_URL"),
            read_timeout: env.seconds("READ_TIMEOUT", 300)?,
            write_timeout: env.seconds("WRITE_TIMEOUT", 300)?,
            resource_manager_enable: env.parse("RESOURCE_MANAGER_ENABLE", false)?,
            resource_manager_interval: env.seconds("RESOURCE_MANAGER_INTERVAL", 15)?,
            rescheduler_enable: env.parse("RESCHEDULER_ENABLE", false)?,
            rescheduler_interval: env.seconds("RESCHEDULER_INTERVAL", 15)?,
            job_tracker_interval: env.seconds("JOB_TRACKER_INTERVAL", 15)?,
            job_retention: env.seconds("JOB_RETENTION", 3600)?,
            scheduling: SchedulingConfig {
                snapshot_freshness: env.seconds("SNAPSHOT_FRESHNESS", 60)?,
                rescheduler_threshold: env.seconds("RESCHEDULER_THRESHOLD", 30)?,
                delegation_timeout: env.seconds("DELEGATION_TIMEOUT", 10)?,
                max_delegation_attempts: env.positive("MAX_DELEGATION_ATTEMPTS", 5)?,
                weights: ScoreWeights {
                    cpu: env.weight("SCORE_WEIGHT_CPU", 0.5)?,
                    memory: env.weight("SCORE_WEIGHT_MEMORY", 0.5)?,
                    gpu_bonus: env.weight("SCORE_GPU_BONUS", 0.25)?,
                    remote_penalty: env.weight("SCORE_REMOTE_PENALTY", 0.05)?,
                    priority: env.weight("SCORE_PRIORITY_WEIGHT", 0.0)?,
                },
            },
            circuit: CircuitConfig {
                failure_threshold: env.positive("CIRCUIT_FAILURE_THRESHOLD", 3)?,
                cooldown: env.seconds("CIRCUIT_COOLDOWN", 30)?,
            },
            remote_clusters: env.clusters("REMOTE_CLUSTERS")?,
        };

        Ok(config)
    }

    /// Address the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.service_port)
    }

    /// Configuration view without credentials, served on `/system/config`
    pub fn public_view(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "namespace": self.namespace,
            "services_namespace": self.services_namespace,
            "serverless_backend": self.serverless_backend,
            "resource_manager_enable": self.resource_manager_enable,
            "rescheduler_enable": self.rescheduler_enable,
            "job_retention_secs": self.job_retention.as_secs(),
            "openfaas_scaler_enable": self.openfaas.scaler_enable,
            "max_delegation_attempts": self.scheduling.max_delegation_attempts,
            "remote_clusters": self
                .remote_clusters
                .iter()
                .map(|c| json!({ "id": c.id, "endpoint": c.endpoint, "capability": c.capability }))
                .collect::<Vec<_>>(),
        })
    }
}

/// Typed access to named configuration entries
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value, `None` when unset or blank
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.raw(name)
            .ok_or_else(|| anyhow!("the configuration variable {} must be provided", name))
    }

    fn lowercase(&self, name: &str, default: &str) -> String {
        self.raw(name)
            .unwrap_or_else(|| default.to_string())
            .to_lowercase()
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(name) {
            Some(value) => value
                .parse::<T>()
                .map_err(|e| anyhow!("the {} value is not valid: {}", name, e)),
            None => Ok(default),
        }
    }

    /// Positive integer number of seconds
    fn seconds(&self, name: &str, default: u64) -> Result<Duration> {
        let secs: u64 = self.parse(name, default)?;
        if secs == 0 {
            bail!("the {} value must be a positive number of seconds", name);
        }
        Ok(Duration::from_secs(secs))
    }

    /// Positive duration: plain seconds, or a number with an `s`, `m` or
    /// `h` suffix (`90`, `45s`, `2m`, `1h`)
    fn duration(&self, name: &str, default: &str) -> Result<Duration> {
        let value = self.raw(name).unwrap_or_else(|| default.to_string());
        let parsed = parse_duration(&value)
            .ok_or_else(|| anyhow!("the {} value '{}' is not a valid duration", name, value))?;
        if parsed.is_zero() {
            bail!("the {} value must be a positive duration", name);
        }
        Ok(parsed)
    }

    fn positive(&self, name: &str, default: u32) -> Result<u32> {
        let value: u32 = self.parse(name, default)?;
        if value == 0 {
            bail!("the {} value must be greater than 0", name);
        }
        Ok(value)
    }

    fn weight(&self, name: &str, default: f64) -> Result<f64> {
        let value: f64 = self.parse(name, default)?;
        if !value.is_finite() || value < 0.0 {
            bail!("the {} value must be a non-negative number", name);
        }
        Ok(value)
    }

    fn url(&self, name: &str) -> Result<Option<String>> {
        match self.raw(name) {
            Some(value) => {
                validate_endpoint(&value).with_context(|| format!("the {} value is not valid", name))?;
                Ok(Some(value.trim_end_matches('/').to_string()))
            }
            None => Ok(None),
        }
    }

    /// JSON array of cluster descriptors
    fn clusters(&self, name: &str) -> Result<Vec<ClusterDescriptor>> {
        let Some(value) = self.raw(name) else {
            return Ok(Vec::new());
        };

        let clusters: Vec<ClusterDescriptor> = serde_json::from_str(&value)
            .with_context(|| format!("the {} value is not a valid cluster list", name))?;

        let mut seen = HashSet::new();
        for cluster in &clusters {
            if cluster.id.as_str().is_empty() {
                bail!("{}: cluster id cannot be empty", name);
            }
            if cluster.id.is_local() {
                bail!("{}: cluster id '{}' is reserved", name, cluster.id);
            }
            if !seen.insert(cluster.id.clone()) {
                bail!("{}: duplicate cluster id '{}'", name, cluster.id);
            }
            validate_endpoint(&cluster.endpoint)
                .with_context(|| format!("{}: cluster '{}'", name, cluster.id))?;
        }

        Ok(clusters)
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };
    let number: u64 = number.parse().ok()?;
    let secs = match unit {
        "s" => number,
        "m" => number.checked_mul(60)?,
        "h" => number.checked_mul(3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        bail!("endpoint '{}' must start with http:// or https://", endpoint);
    }
    Ok(())
}
