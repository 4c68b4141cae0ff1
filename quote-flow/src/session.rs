use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ProductType;
use crate::checklist::{DocumentChecklist, DocumentSlot};
use crate::pricing::Offer;
use crate::stage::Stage;

/// State of one quote conversation.
///
/// Owned by whoever drives it and handed to the controller for each step.
/// Fields only move forward: the product, the offers and the selected offer
/// are each set once, and answers are never removed. A reset replaces the
/// whole value (see [`ConversationSession::reset`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSession {
    id: String,
    /// Bumped on every reset so late work for an older conversation can be
    /// recognised and dropped.
    generation: u64,
    stage: Stage,
    product_type: Option<ProductType>,
    collected_answers: BTreeMap<String, String>,
    generated_offers: Vec<Offer>,
    selected_offer_index: Option<usize>,
    document_checklist: Option<DocumentChecklist>,
    history: Vec<Stage>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// What a completed conversation hands to the lead store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizationRecord {
    pub session_id: String,
    pub product_type: ProductType,
    pub collected_answers: BTreeMap<String, String>,
    pub selected_offer: Offer,
    pub documents: Vec<DocumentSlot>,
    pub completed_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            generation: 0,
            stage: Stage::Greeting,
            product_type: None,
            collected_answers: BTreeMap::new(),
            generated_offers: Vec::new(),
            selected_offer_index: None,
            document_checklist: None,
            history: vec![Stage::Greeting],
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh session under the same id, one generation later. Nothing of
    /// the old conversation carries over.
    pub fn reset(&self) -> Self {
        let mut fresh = Self::new(self.id.clone());
        fresh.generation = self.generation + 1;
        fresh
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn product_type(&self) -> Option<ProductType> {
        self.product_type
    }

    pub fn collected_answers(&self) -> &BTreeMap<String, String> {
        &self.collected_answers
    }

    pub fn generated_offers(&self) -> &[Offer] {
        &self.generated_offers
    }

    pub fn selected_offer_index(&self) -> Option<usize> {
        self.selected_offer_index
    }

    pub fn selected_offer(&self) -> Option<&Offer> {
        self.selected_offer_index
            .and_then(|i| self.generated_offers.get(i))
    }

    pub fn document_checklist(&self) -> Option<&DocumentChecklist> {
        self.document_checklist.as_ref()
    }

    /// Every stage entered since the session (or its last reset) began.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The record handed off once the conversation is complete.
    pub fn finalization_record(&self) -> Option<FinalizationRecord> {
        if !self.stage.is_terminal() {
            return None;
        }
        Some(FinalizationRecord {
            session_id: self.id.clone(),
            product_type: self.product_type?,
            collected_answers: self.collected_answers.clone(),
            selected_offer: self.selected_offer()?.clone(),
            documents: self
                .document_checklist
                .as_ref()
                .map(|c| c.slots().to_vec())
                .unwrap_or_default(),
            completed_at: self.updated_at,
        })
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        debug_assert!(
            self.stage.can_transition_to(stage),
            "illegal transition {} -> {}",
            self.stage,
            stage
        );
        self.stage = stage;
        self.history.push(stage);
        self.touch();
    }

    /// Sets the product. Ignored once a product is chosen.
    pub(crate) fn choose_product(&mut self, product: ProductType) {
        if self.product_type.is_none() {
            self.product_type = Some(product);
            self.touch();
        }
    }

    pub(crate) fn record_answer(&mut self, key: &str, value: String) {
        self.collected_answers.insert(key.to_string(), value);
        self.touch();
    }

    /// Stores the offer set. Ignored once offers exist.
    pub(crate) fn store_offers(&mut self, offers: Vec<Offer>) {
        if self.generated_offers.is_empty() {
            self.generated_offers = offers;
            self.touch();
        }
    }

    /// Records the chosen offer. Ignored once an offer is chosen.
    pub(crate) fn select_offer(&mut self, index: usize) {
        if self.selected_offer_index.is_none() && index < self.generated_offers.len() {
            self.selected_offer_index = Some(index);
            self.touch();
        }
    }

    pub(crate) fn start_checklist(&mut self, checklist: DocumentChecklist) {
        if self.document_checklist.is_none() {
            self.document_checklist = Some(checklist);
            self.touch();
        }
    }

    pub(crate) fn checklist_mut(&mut self) -> Option<&mut DocumentChecklist> {
        self.document_checklist.as_mut()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_at_greeting() {
        let session = ConversationSession::new("s1");
        assert_eq!(session.stage(), Stage::Greeting);
        assert_eq!(session.generation(), 0);
        assert!(session.collected_answers().is_empty());
        assert!(session.generated_offers().is_empty());
        assert!(session.finalization_record().is_none());
    }

    #[test]
    fn reset_discards_everything_but_the_id() {
        let mut session = ConversationSession::new("s1");
        session.enter(Stage::ProductSelection);
        session.choose_product(ProductType::Auto);
        session.record_answer("brand", "Toyota".to_string());

        let fresh = session.reset();
        assert_eq!(fresh.id(), "s1");
        assert_eq!(fresh.generation(), 1);
        assert_eq!(fresh.stage(), Stage::Greeting);
        assert!(fresh.product_type().is_none());
        assert!(fresh.collected_answers().is_empty());
        assert_eq!(fresh.history(), [Stage::Greeting]);
    }

    #[test]
    fn product_is_set_once() {
        let mut session = ConversationSession::new("s1");
        session.choose_product(ProductType::Home);
        session.choose_product(ProductType::Auto);
        assert_eq!(session.product_type(), Some(ProductType::Home));
    }
}
