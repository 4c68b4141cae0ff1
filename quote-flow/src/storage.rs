use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::{error::Result, session::ConversationSession};

/// Trait for storing and retrieving conversation sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: ConversationSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ConversationSession>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, ConversationSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: ConversationSession) -> Result<()> {
        self.sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}
