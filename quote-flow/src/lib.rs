pub mod backend;
pub mod catalog;
pub mod checklist;
pub mod config;
pub mod controller;
pub mod error;
pub mod leads;
pub mod message;
pub mod pricing;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod stage;
pub mod storage;
pub mod task;
pub mod tasks;

// Re-export commonly used types
pub use backend::{QuoteBackend, SimulatedBackend};
pub use catalog::{AttributeStep, Catalog, ProductType};
pub use checklist::{DocumentChecklist, DocumentSlot, SlotStatus};
pub use config::FlowConfig;
pub use controller::{Effect, FlowController, Transition};
pub use error::{FlowError, Result};
pub use leads::{InMemoryLeadStore, LeadStore};
pub use message::{Message, MessagePayload, MessageRole, Pace};
pub use pricing::{CoverageItem, Offer};
pub use runner::{ConversationRunner, SessionSnapshot};
pub use scheduler::{InputSignal, MessageScheduler};
pub use session::{ConversationSession, FinalizationRecord};
pub use stage::Stage;
pub use storage::{InMemorySessionStorage, SessionStorage};
pub use task::{NextAction, StageTask, TaskResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_storage() {
        let storage = InMemorySessionStorage::new();
        let session = ConversationSession::new("session1");

        storage.save(session.clone()).await.unwrap();
        let retrieved = storage.get("session1").await.unwrap();
        assert_eq!(retrieved, Some(session));

        storage.delete("session1").await.unwrap();
        assert!(storage.get("session1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lead_store_starts_empty() {
        let store = InMemoryLeadStore::new();
        assert!(store.list().await.unwrap().is_empty());
    }
}
