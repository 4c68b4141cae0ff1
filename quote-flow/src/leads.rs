//! Hand-off target for completed conversations.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::{error::Result, session::FinalizationRecord};

/// Where finalized quotes go. The engine calls [`LeadStore::save`] once per
/// completed conversation and never retries.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn save(&self, record: FinalizationRecord) -> Result<()>;
    async fn list(&self) -> Result<Vec<FinalizationRecord>>;
}

/// In-memory implementation of LeadStore, keyed by selected offer id
pub struct InMemoryLeadStore {
    leads: Arc<DashMap<Uuid, FinalizationRecord>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self {
            leads: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryLeadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn save(&self, record: FinalizationRecord) -> Result<()> {
        self.leads.insert(record.selected_offer.id, record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FinalizationRecord>> {
        let mut leads: Vec<_> = self.leads.iter().map(|e| e.value().clone()).collect();
        leads.sort_by_key(|r| r.completed_at);
        Ok(leads)
    }
}
