//! Latest proof per proof type, shared by the adapters of one orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use zkflow_types::{ProofResult, ProofType};

/// Concurrent map from proof type to its most recent proof. Upserts are last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct ProofResultCache {
    entries: Arc<RwLock<HashMap<ProofType, ProofResult>>>,
}

impl ProofResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly generated, not yet verified proof. Replaces any older entry.
    pub async fn record_generated(&self, proof_type: ProofType, proof_id: impl Into<String>) -> ProofResult {
        let entry = ProofResult {
            proof_type,
            proof_id: proof_id.into(),
            verified: false,
            timestamp: Utc::now(),
        };
        self.entries.write().await.insert(proof_type, entry.clone());
        entry
    }

    /// Flip `verified` for `proof_id`. Returns false when a newer proof replaced it meanwhile.
    pub async fn mark_verified(&self, proof_type: ProofType, proof_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&proof_type) {
            Some(entry) if entry.proof_id == proof_id => {
                entry.verified = true;
                entry.timestamp = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub async fn latest(&self, proof_type: ProofType) -> Option<ProofResult> {
        self.entries.read().await.get(&proof_type).cloned()
    }

    pub async fn is_verified(&self, proof_type: ProofType) -> bool {
        self.entries
            .read()
            .await
            .get(&proof_type)
            .is_some_and(|entry| entry.verified)
    }

    pub async fn snapshot(&self) -> Vec<ProofResult> {
        let mut entries: Vec<ProofResult> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|entry| entry.proof_type);
        entries
    }
}
