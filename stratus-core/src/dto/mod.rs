//! Data Transfer Objects for inter-service communication
//!
//! DTOs exchanged between control planes and between the CLI and a control
//! plane.

pub mod cluster;
pub mod job;
pub mod service;
