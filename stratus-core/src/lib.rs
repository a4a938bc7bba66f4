//! Stratus Core
//!
//! Core types shared by the Stratus control plane, its HTTP client and CLI.
//!
//! This crate contains:
//! - Domain types: services, clusters, resource snapshots and jobs
//! - DTOs: payloads exchanged between control planes

pub mod domain;
pub mod dto;
