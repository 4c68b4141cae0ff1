//! Boundary to whatever prices quotes and receives documents.
//!
//! The engine only talks to a [`QuoteBackend`]; [`SimulatedBackend`] prices
//! offers locally with the quote generator so a real service can be plugged
//! in later without touching the stage machine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::{
    catalog::{Catalog, ProductType},
    checklist::DocumentSlot,
    error::{FlowError, Result},
    pricing::{self, Offer},
};

#[async_trait]
pub trait QuoteBackend: Send + Sync {
    /// Returns `count` offers for the product and collected answers.
    async fn request_offers(
        &self,
        product: ProductType,
        answers: &BTreeMap<String, String>,
        count: usize,
    ) -> Result<Vec<Offer>>;

    /// Accepts the document for `slot`.
    async fn submit_document(
        &self,
        session_id: &str,
        product: ProductType,
        slot: &DocumentSlot,
    ) -> Result<()>;
}

/// Local backend: randomized pricing over the catalog, documents always
/// accepted.
pub struct SimulatedBackend {
    catalog: Arc<Catalog>,
    rng: Mutex<StdRng>,
    latency: Duration,
}

impl SimulatedBackend {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self::seeded(catalog, rand::random())
    }

    /// Deterministic pricing for a given seed.
    pub fn seeded(catalog: Arc<Catalog>, seed: u64) -> Self {
        Self {
            catalog,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            latency: Duration::ZERO,
        }
    }

    /// Emulates a network round trip on every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl QuoteBackend for SimulatedBackend {
    async fn request_offers(
        &self,
        product: ProductType,
        answers: &BTreeMap<String, String>,
        count: usize,
    ) -> Result<Vec<Offer>> {
        self.round_trip().await;
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| FlowError::BackendFailed(format!("rng lock poisoned: {e}")))?;
        let offers = pricing::generate(product, &self.catalog, count, &mut *rng);
        debug!(
            product = %product,
            answers = answers.len(),
            offers = offers.len(),
            "Simulated offers generated"
        );
        Ok(offers)
    }

    async fn submit_document(
        &self,
        session_id: &str,
        product: ProductType,
        slot: &DocumentSlot,
    ) -> Result<()> {
        self.round_trip().await;
        debug!(session_id = %session_id, product = %product, slot = %slot.id, "Simulated document accepted");
        Ok(())
    }
}
