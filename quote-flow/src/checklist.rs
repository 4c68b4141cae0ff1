//! Document checklist: strict, in-order intake of the documents a product
//! requires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ProductType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Fulfilled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSlot {
    pub id: String,
    pub label: String,
    pub status: SlotStatus,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

/// Ordered document slots plus a pointer to the next pending one.
///
/// The pointer only moves forward, one slot per [`advance`](Self::advance),
/// so slot `k + 1` can never be fulfilled before slot `k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChecklist {
    slots: Vec<DocumentSlot>,
    current_slot_index: usize,
}

impl DocumentChecklist {
    /// Builds the checklist for `product`; empty for products that need no
    /// documents.
    pub fn for_product(product: ProductType, catalog: &Catalog) -> Self {
        let slots = catalog
            .document_slots(product)
            .iter()
            .map(|slot| DocumentSlot {
                id: slot.id.clone(),
                label: slot.label.clone(),
                status: SlotStatus::Pending,
                fulfilled_at: None,
            })
            .collect();
        Self {
            slots,
            current_slot_index: 0,
        }
    }

    pub fn slots(&self) -> &[DocumentSlot] {
        &self.slots
    }

    pub fn current_slot_index(&self) -> usize {
        self.current_slot_index
    }

    /// The next slot awaiting a document, if any.
    pub fn current_slot(&self) -> Option<&DocumentSlot> {
        self.slots.get(self.current_slot_index)
    }

    pub fn is_complete(&self) -> bool {
        self.current_slot_index >= self.slots.len()
    }

    pub fn remaining(&self) -> usize {
        self.slots.len().saturating_sub(self.current_slot_index)
    }

    /// Fulfills the current slot and moves to the next one.
    ///
    /// Returns the slot just fulfilled. On a complete checklist this is a
    /// no-op returning `None`.
    pub fn advance(&mut self) -> Option<&DocumentSlot> {
        let index = self.current_slot_index;
        let slot = self.slots.get_mut(index)?;
        slot.status = SlotStatus::Fulfilled;
        slot.fulfilled_at = Some(Utc::now());
        self.current_slot_index += 1;
        self.slots.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto_checklist() -> DocumentChecklist {
        DocumentChecklist::for_product(ProductType::Auto, &Catalog::default())
    }

    #[test]
    fn advance_fulfills_lowest_pending_slot() {
        let mut checklist = auto_checklist();
        let ids: Vec<String> = checklist.slots().iter().map(|s| s.id.clone()).collect();
        assert!(!ids.is_empty());

        for (i, id) in ids.iter().enumerate() {
            assert_eq!(checklist.current_slot().map(|s| &s.id), Some(id));
            let fulfilled = checklist.advance().unwrap();
            assert_eq!(&fulfilled.id, id);
            assert_eq!(fulfilled.status, SlotStatus::Fulfilled);
            // everything after the fulfilled slot is still pending
            assert!(
                checklist.slots()[i + 1..]
                    .iter()
                    .all(|s| s.status == SlotStatus::Pending)
            );
        }
        assert!(checklist.is_complete());
        assert_eq!(checklist.remaining(), 0);
    }

    #[test]
    fn advance_on_complete_checklist_is_noop() {
        let mut checklist = auto_checklist();
        for _ in 0..checklist.slots().len() {
            checklist.advance();
        }
        let before = checklist.clone();
        assert!(checklist.advance().is_none());
        assert_eq!(checklist, before);
    }

    #[test]
    fn product_without_documents_starts_complete() {
        let mut checklist = DocumentChecklist::for_product(ProductType::Travel, &Catalog::default());
        assert!(checklist.is_complete());
        assert!(checklist.current_slot().is_none());
        assert!(checklist.advance().is_none());
    }
}
