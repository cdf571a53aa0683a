use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::collisions::CollisionRequest;

/// A land mutation waiting for an administrator decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approve {
    pub request: CollisionRequest,
    pub price: f64,
    /// Unix seconds.
    pub created_at: u64,
}

impl Approve {
    pub fn new(request: CollisionRequest, price: f64) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            request,
            price,
            created_at,
        }
    }

    pub fn land_name(&self) -> &str {
        &self.request.land_name
    }
}

/// Pending approvals keyed by lower-cased land name. At most one request
/// per land name can wait at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApproveList {
    entries: BTreeMap<String, Approve>,
}

impl ApproveList {
    /// Queue `approve`, replacing any entry for the same land name.
    pub fn add(&mut self, approve: Approve) -> Option<Approve> {
        let key = approve.land_name().to_lowercase();
        self.entries.insert(key, approve)
    }

    pub fn get(&self, land_name: &str) -> Option<&Approve> {
        self.entries.get(&land_name.to_lowercase())
    }

    pub fn remove(&mut self, land_name: &str) -> Option<Approve> {
        self.entries.remove(&land_name.to_lowercase())
    }

    pub fn is_in_approve(&self, land_name: &str) -> bool {
        self.entries.contains_key(&land_name.to_lowercase())
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<&Approve> {
        let mut list: Vec<&Approve> = self.entries.values().collect();
        list.sort_by_key(|a| a.created_at);
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
