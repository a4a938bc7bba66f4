//! Core domain types
//!
//! These types describe what the control plane schedules (services and jobs)
//! and where it can schedule them (clusters and their resource snapshots).
//! They are shared between the controller (which owns and mutates them) and
//! the client/CLI (which only read them over HTTP).

pub mod cluster;
pub mod job;
pub mod service;
