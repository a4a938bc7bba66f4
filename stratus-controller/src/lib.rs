//! Stratus control plane
//!
//! Exposes declarative services on top of a Kubernetes serverless runtime
//! and routes every invocation to the cluster with capacity for it, local
//! or remote.

pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod kube;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;
