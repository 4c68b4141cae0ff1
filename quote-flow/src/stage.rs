//! Conversation stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a conversation is.
///
/// Progresses: Greeting → ProductSelection → AttributeCollection(0..k) →
/// QuoteLoading → QuotePresented → QuoteSelected → DocumentCollection →
/// Complete. Only an explicit reset goes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Greeting,
    ProductSelection,
    /// Asking the product's `step`-th attribute question.
    AttributeCollection { step: usize },
    /// Waiting on the quote backend. `failed` is set when the last request
    /// failed and the user may retry.
    QuoteLoading { failed: bool },
    QuotePresented,
    QuoteSelected,
    /// Collecting the checklist's current slot. `uploading` is set while a
    /// submitted document is with the backend.
    DocumentCollection { uploading: bool },
    Complete,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::ProductSelection => "product_selection",
            Self::AttributeCollection { .. } => "attribute_collection",
            Self::QuoteLoading { .. } => "quote_loading",
            Self::QuotePresented => "quote_presented",
            Self::QuoteSelected => "quote_selected",
            Self::DocumentCollection { .. } => "document_collection",
            Self::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Check if moving from `self` to `target` is a legal forward step.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;
        match (*self, target) {
            (Greeting, ProductSelection) => true,
            (ProductSelection, AttributeCollection { step: 0 }) => true,
            (AttributeCollection { step: from }, AttributeCollection { step: to }) => to == from + 1,
            (AttributeCollection { .. }, QuoteLoading { failed: false }) => true,
            (QuoteLoading { failed: false }, QuoteLoading { failed: true }) => true,
            (QuoteLoading { failed: true }, QuoteLoading { failed: false }) => true,
            (QuoteLoading { failed: false }, QuotePresented) => true,
            (QuotePresented, QuoteSelected) => true,
            (QuoteSelected, DocumentCollection { uploading: false }) => true,
            (QuoteSelected, Complete) => true,
            (DocumentCollection { uploading: false }, DocumentCollection { uploading: true }) => true,
            (DocumentCollection { uploading: true }, DocumentCollection { uploading: false }) => true,
            (DocumentCollection { uploading: true }, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttributeCollection { step } => write!(f, "{}({step})", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sessions_start_at_greeting() {
        assert_eq!(Stage::default(), Stage::Greeting);
        assert!(!Stage::default().is_terminal());
    }

    #[test]
    fn forward_transitions_are_allowed() {
        use Stage::*;
        let path = [
            Greeting,
            ProductSelection,
            AttributeCollection { step: 0 },
            AttributeCollection { step: 1 },
            QuoteLoading { failed: false },
            QuotePresented,
            QuoteSelected,
            DocumentCollection { uploading: false },
            DocumentCollection { uploading: true },
            Complete,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_and_going_back_is_rejected() {
        use Stage::*;
        assert!(!Greeting.can_transition_to(AttributeCollection { step: 0 }));
        assert!(!AttributeCollection { step: 0 }.can_transition_to(AttributeCollection { step: 2 }));
        assert!(!QuotePresented.can_transition_to(DocumentCollection { uploading: false }));
        assert!(!QuoteLoading { failed: true }.can_transition_to(QuotePresented));
        assert!(!Complete.can_transition_to(Greeting));
        assert!(!QuotePresented.can_transition_to(QuotePresented));
    }

    #[test]
    fn display_and_serde_names() {
        assert_eq!(Stage::AttributeCollection { step: 3 }.to_string(), "attribute_collection(3)");
        assert_eq!(Stage::QuotePresented.to_string(), "quote_presented");
        let json = serde_json::to_value(Stage::QuoteLoading { failed: true }).unwrap();
        assert_eq!(json["stage"], "quote_loading");
        assert_eq!(json["failed"], true);
        assert!(Stage::Complete.is_terminal());
    }
}
