//! Candidate filtering and ranking

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use stratus_core::domain::cluster::ClusterId;
use stratus_core::domain::service::Service;
use stratus_core::dto::cluster::CircuitState;

use crate::config::ScoreWeights;
use crate::registry::Candidate;

/// Scores closer than this are ties
const SCORE_EPSILON: f64 = 1e-9;

/// Why a candidate was discarded before scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    AlreadyAttempted,
    CircuitOpen,
    Unreachable,
    Insufficient,
}

/// Checks a candidate against the snapshot and circuit rules
///
/// A stale or never-polled snapshot is not a reason to exclude: its
/// capacity is unknown, so the fit check only applies to fresh numbers.
pub fn exclusion(
    candidate: &Candidate,
    service: &Service,
    attempted: &[ClusterId],
    now: DateTime<Utc>,
    freshness: chrono::Duration,
) -> Option<Exclusion> {
    if attempted.contains(&candidate.id) {
        return Some(Exclusion::AlreadyAttempted);
    }
    if candidate.circuit == CircuitState::Open {
        return Some(Exclusion::CircuitOpen);
    }
    if !candidate.snapshot.reachable && candidate.snapshot.last_updated.is_some() {
        return Some(Exclusion::Unreachable);
    }
    if candidate.snapshot.is_fresh(now, freshness) && !candidate.snapshot.fits(&service.resources) {
        return Some(Exclusion::Insufficient);
    }
    None
}

/// Scores a candidate; capacity terms only count when `fresh`
pub fn score(candidate: &Candidate, service: &Service, weights: &ScoreWeights, fresh: bool) -> f64 {
    let snapshot = &candidate.snapshot;
    let mut score = 0.0;

    if fresh {
        score += snapshot.normalized_free_cpu() * weights.cpu
            + snapshot.normalized_free_memory() * weights.memory;

        let gpus = service.resources.gpus();
        if gpus > 0 && snapshot.free_gpu >= gpus {
            score += weights.gpu_bonus;
        }
    }
    if !candidate.is_local() {
        score -= weights.remote_penalty;
    }
    score - f64::from(candidate.priority) * weights.priority
}

#[derive(Debug, Clone)]
pub struct Ranked {
    pub candidate: Candidate,
    pub score: f64,
    pub in_flight: usize,
    /// Snapshot within the freshness threshold
    pub fresh: bool,
}

/// Fresh snapshots first, then highest score; ties go to local, then the
/// least busy cluster, then the lowest id
pub fn compare(a: &Ranked, b: &Ranked) -> Ordering {
    let by_score = if (a.score - b.score).abs() < SCORE_EPSILON {
        Ordering::Equal
    } else {
        b.score.total_cmp(&a.score)
    };

    b.fresh
        .cmp(&a.fresh)
        .then(by_score)
        .then_with(|| b.candidate.is_local().cmp(&a.candidate.is_local()))
        .then_with(|| a.in_flight.cmp(&b.in_flight))
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

/// Filters and orders candidates, best first
pub fn rank(
    candidates: Vec<Candidate>,
    service: &Service,
    attempted: &[ClusterId],
    in_flight: &HashMap<ClusterId, usize>,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
    freshness: chrono::Duration,
) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = candidates
        .into_iter()
        .filter(|candidate| {
            match exclusion(candidate, service, attempted, now, freshness) {
                Some(reason) => {
                    tracing::debug!(cluster = %candidate.id, ?reason, "Candidate excluded");
                    false
                }
                None => true,
            }
        })
        .map(|candidate| {
            let fresh = candidate.snapshot.is_fresh(now, freshness);
            Ranked {
                score: score(&candidate, service, weights, fresh),
                in_flight: in_flight.get(&candidate.id).copied().unwrap_or(0),
                fresh,
                candidate,
            }
        })
        .collect();

    ranked.sort_by(compare);
    ranked
}
