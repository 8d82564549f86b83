//! Two-tier FIFO per specialty bucket
//!
//! ```text
//! bucket "crisis":  [ high: h1 h2 ][ standard: n1 l1 n2 ]
//!                     positions 1 2            3  4  5
//! ```
//!
//! A high-urgency request lands behind the existing high tier and ahead of
//! every normal/low request. Within a tier order is arrival order, so a
//! queued request never moves backwards.

use std::collections::{HashMap, VecDeque};

use super::types::{RequestId, Urgency};

/// Bucket used when no specialty was requested
pub const GENERAL_BUCKET: &str = "general";

/// Bucket key for an optional specialty
pub fn bucket_for(specialty: Option<&str>) -> String {
    match specialty.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.to_lowercase(),
        None => GENERAL_BUCKET.to_string(),
    }
}

#[derive(Debug, Default, Clone)]
struct Bucket {
    high: VecDeque<RequestId>,
    standard: VecDeque<RequestId>,
}

impl Bucket {
    fn iter(&self) -> impl Iterator<Item = &RequestId> {
        self.high.iter().chain(self.standard.iter())
    }

    fn len(&self) -> usize {
        self.high.len() + self.standard.len()
    }
}

#[derive(Debug, Default, Clone)]
pub struct HandoffQueue {
    buckets: HashMap<String, Bucket>,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue and return the 1-based position
    pub fn enqueue(&mut self, bucket: &str, request_id: &str, urgency: Urgency) -> u32 {
        let b = self.buckets.entry(bucket.to_string()).or_default();
        if urgency.is_priority() {
            b.high.push_back(request_id.to_string());
            b.high.len() as u32
        } else {
            b.standard.push_back(request_id.to_string());
            b.len() as u32
        }
    }

    /// 1-based position of a request within its bucket
    pub fn position(&self, bucket: &str, request_id: &str) -> Option<u32> {
        self.buckets
            .get(bucket)?
            .iter()
            .position(|id| id == request_id)
            .map(|i| i as u32 + 1)
    }

    pub fn remove(&mut self, bucket: &str, request_id: &str) -> bool {
        let Some(b) = self.buckets.get_mut(bucket) else {
            return false;
        };
        let removed = if let Some(i) = b.high.iter().position(|id| id == request_id) {
            b.high.remove(i).is_some()
        } else if let Some(i) = b.standard.iter().position(|id| id == request_id) {
            b.standard.remove(i).is_some()
        } else {
            false
        };
        if b.len() == 0 {
            self.buckets.remove(bucket);
        }
        removed
    }

    /// Request ids of a bucket in service order
    pub fn ordered(&self, bucket: &str) -> Vec<RequestId> {
        self.buckets
            .get(bucket)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, bucket: &str) -> usize {
        self.buckets.get(bucket).map(Bucket::len).unwrap_or(0)
    }

    pub fn total_len(&self) -> usize {
        self.buckets.values().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.keys().cloned().collect();
        names.sort();
        names
    }
}
