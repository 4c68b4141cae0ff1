//! Conversation flow controller: the stage machine driving a quote.
//!
//! The controller is synchronous and holds no session state. Each operation
//! takes the session, mutates it through its forward-only setters and
//! returns a [`Transition`]: the messages to deliver, plus at most one
//! [`Effect`] for the caller to run asynchronously. The result of that
//! effect comes back through [`FlowController::offers_ready`] or
//! [`FlowController::document_submitted`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    catalog::{Catalog, ProductType},
    checklist::{DocumentChecklist, DocumentSlot},
    error::Result,
    message::{Message, MessagePayload},
    pricing::Offer,
    session::{ConversationSession, FinalizationRecord},
    stage::Stage,
    task::{NextAction, StageTask},
    tasks::{
        AttributeCollectionTask, CompleteTask, DocumentCollectionTask, GreetingTask,
        ProductSelectionTask, QuoteLoadingTask, QuotePresentedTask,
    },
};

/// Async work requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch offers; answer with [`FlowController::offers_ready`].
    RequestOffers {
        product: ProductType,
        answers: BTreeMap<String, String>,
    },
    /// Hand a document over; answer with [`FlowController::document_submitted`].
    SubmitDocument {
        product: ProductType,
        slot: DocumentSlot,
    },
}

/// Outcome of one controller operation.
#[derive(Debug, Clone)]
pub struct Transition {
    /// False when the input was rejected and the session left untouched.
    pub accepted: bool,
    pub from: Stage,
    pub to: Stage,
    /// Messages to enqueue, in order.
    pub messages: Vec<Message>,
    pub effect: Option<Effect>,
    /// Set on the transition that reaches `Complete`.
    pub finalized: Option<FinalizationRecord>,
}

impl Transition {
    fn accepted(from: Stage, messages: Vec<Message>) -> Self {
        Self {
            accepted: true,
            from,
            to: from,
            messages,
            effect: None,
            finalized: None,
        }
    }

    fn rejected(stage: Stage, messages: Vec<Message>) -> Self {
        Self {
            accepted: false,
            ..Self::accepted(stage, messages)
        }
    }
}

pub struct FlowController {
    catalog: Arc<Catalog>,
    offer_count: usize,
}

impl FlowController {
    pub fn new(catalog: Arc<Catalog>, offer_count: usize) -> Self {
        Self {
            catalog,
            offer_count,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn offer_count(&self) -> usize {
        self.offer_count
    }

    /// `None` for stages that never wait on input.
    fn task_for(stage: Stage) -> Option<&'static dyn StageTask> {
        match stage {
            Stage::Greeting => Some(&GreetingTask),
            Stage::ProductSelection => Some(&ProductSelectionTask),
            Stage::AttributeCollection { .. } => Some(&AttributeCollectionTask),
            Stage::QuoteLoading { .. } => Some(&QuoteLoadingTask),
            Stage::QuotePresented => Some(&QuotePresentedTask),
            Stage::QuoteSelected => None,
            Stage::DocumentCollection { .. } => Some(&DocumentCollectionTask),
            Stage::Complete => Some(&CompleteTask),
        }
    }

    /// Starts a new conversation at the greeting.
    pub fn start(&self, session_id: impl Into<String>) -> (ConversationSession, Transition) {
        let session = ConversationSession::new(session_id);
        info!(session_id = %session.id(), "Conversation started");
        let transition = Transition::accepted(session.stage(), self.prompt(&session));
        (session, transition)
    }

    /// Replaces `session` with a fresh one at the greeting.
    pub fn reset(&self, session: &ConversationSession) -> (ConversationSession, Transition) {
        let fresh = session.reset();
        info!(
            session_id = %fresh.id(),
            generation = fresh.generation(),
            abandoned_stage = %session.stage(),
            "Conversation reset"
        );
        let transition = Transition::accepted(fresh.stage(), self.prompt(&fresh));
        (fresh, transition)
    }

    /// The messages asking for the current stage's input.
    pub fn prompt(&self, session: &ConversationSession) -> Vec<Message> {
        Self::task_for(session.stage())
            .map(|task| task.prompt(session, &self.catalog))
            .unwrap_or_default()
    }

    /// Handles one user input.
    ///
    /// Input outside the current stage's valid set leaves the session
    /// untouched and re-emits the current prompt, preceded by a correction
    /// when the stage has one.
    pub fn submit(&self, session: &mut ConversationSession, input: &str) -> Transition {
        let from = session.stage();
        let Some(task) = Self::task_for(from) else {
            return Transition::rejected(from, Vec::new());
        };

        let result = task.run(session, input, &self.catalog);
        debug!(
            session_id = %session.id(),
            task_id = %task.id(),
            stage = %from,
            status = ?result.status_message,
            "Stage task finished"
        );

        match result.next_action {
            NextAction::Reprompt => {
                let mut messages = result.messages;
                messages.extend(task.prompt(session, &self.catalog));
                Transition::rejected(from, messages)
            }
            NextAction::WaitForCompletion => Transition::accepted(from, result.messages),
            NextAction::GoTo(stage) => {
                let mut transition = Transition::accepted(from, result.messages);
                self.enter(session, stage, &mut transition);
                transition
            }
        }
    }

    /// Completion of an [`Effect::RequestOffers`].
    ///
    /// A successful result must hold exactly the configured number of
    /// offers; anything else counts as a failure the user can retry.
    pub fn offers_ready(
        &self,
        session: &mut ConversationSession,
        result: Result<Vec<Offer>>,
    ) -> Transition {
        let from = session.stage();
        if from != (Stage::QuoteLoading { failed: false }) {
            warn!(session_id = %session.id(), stage = %from, "Offers arrived outside quote loading, dropping");
            return Transition::rejected(from, Vec::new());
        }

        let failure = match result {
            Ok(offers) if offers.len() == self.offer_count => {
                info!(
                    session_id = %session.id(),
                    offers = offers.len(),
                    "Offers generated"
                );
                session.store_offers(offers);
                let mut transition = Transition::accepted(from, Vec::new());
                self.enter(session, Stage::QuotePresented, &mut transition);
                return transition;
            }
            Ok(offers) => format!(
                "expected {} offers, got {}",
                self.offer_count,
                offers.len()
            ),
            Err(e) => e.to_string(),
        };

        warn!(session_id = %session.id(), error = %failure, "Offer request failed");
        let mut transition = Transition::accepted(
            from,
            vec![Message::error(
                "Sorry, we couldn't get your quotes right now.",
            )],
        );
        self.enter(session, Stage::QuoteLoading { failed: true }, &mut transition);
        transition
    }

    /// Completion of an [`Effect::SubmitDocument`].
    pub fn document_submitted(
        &self,
        session: &mut ConversationSession,
        result: Result<()>,
    ) -> Transition {
        let from = session.stage();
        if from != (Stage::DocumentCollection { uploading: true }) {
            warn!(session_id = %session.id(), stage = %from, "Document result outside upload, dropping");
            return Transition::rejected(from, Vec::new());
        }

        match result {
            Ok(()) => {
                let Some(checklist) = session.checklist_mut() else {
                    return Transition::rejected(from, Vec::new());
                };
                let label = checklist
                    .advance()
                    .map(|slot| slot.label.clone())
                    .unwrap_or_default();
                let complete = checklist.is_complete();
                let remaining = checklist.remaining();
                info!(
                    session_id = %session.id(),
                    document = %label,
                    remaining,
                    "Document accepted"
                );

                let mut transition =
                    Transition::accepted(from, vec![Message::system(format!("Got your {label}."))]);
                let next = if complete {
                    Stage::Complete
                } else {
                    Stage::DocumentCollection { uploading: false }
                };
                self.enter(session, next, &mut transition);
                transition
            }
            Err(e) => {
                let label = session
                    .document_checklist()
                    .and_then(|c| c.current_slot())
                    .map(|s| s.label.clone())
                    .unwrap_or_default();
                warn!(session_id = %session.id(), error = %e, document = %label, "Document upload failed");
                let mut transition = Transition::accepted(
                    from,
                    vec![Message::error(format!(
                        "We couldn't upload your {label}. Please try again."
                    ))],
                );
                self.enter(session, Stage::DocumentCollection { uploading: false }, &mut transition);
                transition
            }
        }
    }

    /// Moves the session into `stage` and appends what entering it produces.
    fn enter(&self, session: &mut ConversationSession, stage: Stage, transition: &mut Transition) {
        info!(
            session_id = %session.id(),
            from = %session.stage(),
            to = %stage,
            "Stage transition"
        );
        session.enter(stage);
        transition.to = stage;

        match stage {
            Stage::QuoteLoading { failed: false } => {
                transition.messages.extend(self.prompt(session));
                if let Some(product) = session.product_type() {
                    transition.effect = Some(Effect::RequestOffers {
                        product,
                        answers: session.collected_answers().clone(),
                    });
                }
            }
            Stage::QuoteSelected => {
                let Some(product) = session.product_type() else {
                    return;
                };
                let checklist = DocumentChecklist::for_product(product, &self.catalog);
                let next = if checklist.is_complete() {
                    Stage::Complete
                } else {
                    Stage::DocumentCollection { uploading: false }
                };
                session.start_checklist(checklist);
                self.enter(session, next, transition);
            }
            Stage::DocumentCollection { uploading: true } => {
                transition.messages.extend(self.prompt(session));
                let slot = session
                    .document_checklist()
                    .and_then(|c| c.current_slot())
                    .cloned();
                if let (Some(product), Some(slot)) = (session.product_type(), slot) {
                    transition.effect = Some(Effect::SubmitDocument { product, slot });
                }
            }
            Stage::Complete => {
                let record = session.finalization_record();
                let mut messages = self.prompt(session);
                if let (Some(record), Some(last)) = (&record, messages.last_mut()) {
                    last.payload = Some(MessagePayload::Finalized(Box::new(record.clone())));
                }
                transition.messages.extend(messages);
                transition.finalized = record;
            }
            _ => transition.messages.extend(self.prompt(session)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::pricing;
    use crate::tasks::{RETRY_OPTION, START_OPTION};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn controller() -> FlowController {
        FlowController::new(Arc::new(Catalog::default()), 4)
    }

    fn offers(controller: &FlowController, product: ProductType) -> Vec<Offer> {
        pricing::generate(
            product,
            controller.catalog(),
            controller.offer_count(),
            &mut StdRng::seed_from_u64(11),
        )
    }

    /// Drives a session to quote loading for `product` with valid answers.
    fn to_quote_loading(controller: &FlowController, product: ProductType) -> ConversationSession {
        let (mut session, _) = controller.start("s1");
        controller.submit(&mut session, START_OPTION);
        controller.submit(&mut session, product.as_str());
        let steps = controller.catalog().attribute_steps(product).to_vec();
        for step in steps {
            let answer = match step.options().first() {
                Some(option) => option.clone(),
                None => match step.key.as_str() {
                    "year" => "2023".to_string(),
                    "postal_code" => "01000".to_string(),
                    _ => "Corolla".to_string(),
                },
            };
            let t = controller.submit(&mut session, &answer);
            assert!(t.accepted, "{} rejected {answer}", step.key);
        }
        assert_eq!(session.stage(), Stage::QuoteLoading { failed: false });
        session
    }

    #[test]
    fn start_emits_greeting_with_start_option() {
        let (session, transition) = controller().start("s1");
        assert_eq!(session.stage(), Stage::Greeting);
        assert_eq!(transition.messages.len(), 1);
        assert_eq!(transition.messages[0].options, vec![START_OPTION.to_string()]);
    }

    #[test]
    fn auto_scenario_collects_five_answers_then_requests_offers() {
        let controller = controller();
        let (mut session, _) = controller.start("s1");
        controller.submit(&mut session, "start");
        let t = controller.submit(&mut session, "auto");
        assert_eq!(t.to, Stage::AttributeCollection { step: 0 });

        let answers = ["Toyota", "Corolla", "2023", "personal", "full"];
        let mut last = None;
        for answer in answers {
            let t = controller.submit(&mut session, answer);
            assert!(t.accepted);
            last = Some(t);
        }
        let last = last.unwrap();
        assert_eq!(last.to, Stage::QuoteLoading { failed: false });
        match last.effect {
            Some(Effect::RequestOffers { product, answers }) => {
                assert_eq!(product, ProductType::Auto);
                assert_eq!(answers.get("brand").map(String::as_str), Some("Toyota"));
                assert_eq!(answers.get("coverage_level").map(String::as_str), Some("full"));
                assert_eq!(answers.len(), 5);
            }
            other => panic!("expected offer request, got {other:?}"),
        }
    }

    #[test]
    fn invalid_input_leaves_session_unchanged() {
        let controller = controller();
        let (mut session, _) = controller.start("s1");
        controller.submit(&mut session, "start");
        controller.submit(&mut session, "auto");
        controller.submit(&mut session, "Toyota");
        controller.submit(&mut session, "Corolla");
        assert_eq!(session.stage(), Stage::AttributeCollection { step: 2 });

        let before = session.clone();
        let long = "9".repeat(200);
        for bad in ["", "   ", "abc", "23", "3023", long.as_str()] {
            let t = controller.submit(&mut session, bad);
            assert!(!t.accepted);
            assert!(t.effect.is_none());
            assert!(t.messages[0].content.contains("four-digit year"));
            assert!(t.messages.len() >= 2, "reprompt must re-emit the prompt");
        }
        assert_eq!(session, before);
    }

    #[test]
    fn unknown_product_is_rejected() {
        let controller = controller();
        let (mut session, _) = controller.start("s1");
        controller.submit(&mut session, "start");
        let before = session.clone();
        let t = controller.submit(&mut session, "spaceship");
        assert!(!t.accepted);
        assert_eq!(session, before);
    }

    #[test]
    fn offers_ready_presents_offers() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Auto);
        let t = controller.offers_ready(&mut session, Ok(offers(&controller, ProductType::Auto)));
        assert_eq!(t.to, Stage::QuotePresented);
        assert_eq!(session.generated_offers().len(), 4);
        let payload = t.messages.last().and_then(|m| m.payload.clone());
        assert!(matches!(payload, Some(MessagePayload::Offers(ref o)) if o.len() == 4));
    }

    #[test]
    fn failed_offer_request_can_be_retried() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Home);
        let t = controller.offers_ready(
            &mut session,
            Err(FlowError::BackendFailed("connection refused".to_string())),
        );
        assert_eq!(session.stage(), Stage::QuoteLoading { failed: true });
        assert!(t.messages.iter().any(|m| m.is_error));
        assert!(session.generated_offers().is_empty());

        let t = controller.submit(&mut session, RETRY_OPTION);
        assert_eq!(t.to, Stage::QuoteLoading { failed: false });
        assert!(matches!(t.effect, Some(Effect::RequestOffers { .. })));
    }

    #[test]
    fn short_offer_set_counts_as_failure() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Auto);
        let mut partial = offers(&controller, ProductType::Auto);
        partial.truncate(2);
        controller.offers_ready(&mut session, Ok(partial));
        assert_eq!(session.stage(), Stage::QuoteLoading { failed: true });
        assert!(session.generated_offers().is_empty());
    }

    #[test]
    fn selecting_offer_passes_through_quote_selected_once() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Auto);
        controller.offers_ready(&mut session, Ok(offers(&controller, ProductType::Auto)));

        let t = controller.submit(&mut session, "0");
        assert_eq!(t.to, Stage::DocumentCollection { uploading: false });
        assert_eq!(session.selected_offer_index(), Some(0));
        let selected = session
            .history()
            .iter()
            .filter(|s| **s == Stage::QuoteSelected)
            .count();
        assert_eq!(selected, 1);
        assert!(!session.document_checklist().unwrap().is_complete());
    }

    #[test]
    fn offer_can_be_picked_by_insurer_name() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Auto);
        let generated = offers(&controller, ProductType::Auto);
        let name = generated[2].insurer_name.to_uppercase();
        controller.offers_ready(&mut session, Ok(generated));
        controller.submit(&mut session, &name);
        assert_eq!(session.selected_offer_index(), Some(2));
    }

    #[test]
    fn out_of_range_offer_index_is_rejected() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Auto);
        controller.offers_ready(&mut session, Ok(offers(&controller, ProductType::Auto)));
        let before = session.clone();
        let t = controller.submit(&mut session, "4");
        assert!(!t.accepted);
        assert_eq!(session, before);
    }

    #[test]
    fn documents_are_collected_in_order() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Auto);
        controller.offers_ready(&mut session, Ok(offers(&controller, ProductType::Auto)));
        controller.submit(&mut session, "1");

        let ids: Vec<String> = session
            .document_checklist()
            .unwrap()
            .slots()
            .iter()
            .map(|s| s.id.clone())
            .collect();

        // naming a later slot first is refused
        let before = session.clone();
        let t = controller.submit(&mut session, &ids[1]);
        assert!(!t.accepted);
        assert!(t.messages[0].content.contains("One at a time"));
        assert_eq!(session, before);

        let mut finalized = None;
        for id in &ids {
            let t = controller.submit(&mut session, id);
            assert_eq!(t.to, Stage::DocumentCollection { uploading: true });
            match &t.effect {
                Some(Effect::SubmitDocument { slot, .. }) => assert_eq!(&slot.id, id),
                other => panic!("expected document effect, got {other:?}"),
            }
            let t = controller.document_submitted(&mut session, Ok(()));
            finalized = t.finalized;
        }

        assert_eq!(session.stage(), Stage::Complete);
        let record = finalized.expect("completion hands off a record");
        assert_eq!(record.product_type, ProductType::Auto);
        assert_eq!(record.selected_offer, session.generated_offers()[1]);
        assert_eq!(record.documents.len(), ids.len());
    }

    #[test]
    fn failed_upload_keeps_the_same_slot() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Health);
        controller.offers_ready(&mut session, Ok(offers(&controller, ProductType::Health)));
        controller.submit(&mut session, "0");
        let first = session.document_checklist().unwrap().current_slot().unwrap().id.clone();

        controller.submit(&mut session, &first);
        let t = controller.document_submitted(
            &mut session,
            Err(FlowError::BackendTimeout(std::time::Duration::from_secs(10))),
        );
        assert!(t.messages.iter().any(|m| m.is_error));
        assert_eq!(session.stage(), Stage::DocumentCollection { uploading: false });
        assert_eq!(session.document_checklist().unwrap().current_slot_index(), 0);

        let t = controller.submit(&mut session, &first);
        assert!(t.accepted);
    }

    #[test]
    fn product_without_documents_completes_on_selection() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Travel);
        controller.offers_ready(&mut session, Ok(offers(&controller, ProductType::Travel)));
        let t = controller.submit(&mut session, "3");
        assert_eq!(t.to, Stage::Complete);
        assert!(t.finalized.is_some());
        assert!(session.history().contains(&Stage::QuoteSelected));
        assert!(!session.history().iter().any(|s| matches!(s, Stage::DocumentCollection { .. })));
    }

    #[test]
    fn submit_after_complete_is_noop() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Travel);
        controller.offers_ready(&mut session, Ok(offers(&controller, ProductType::Travel)));
        controller.submit(&mut session, "0");
        let before = session.clone();
        let t = controller.submit(&mut session, "anything");
        assert!(!t.accepted);
        assert!(t.finalized.is_none());
        assert_eq!(session, before);
    }

    #[test]
    fn late_completions_are_dropped() {
        let controller = controller();
        let (mut session, _) = controller.start("s1");
        let before = session.clone();
        let t = controller.offers_ready(&mut session, Ok(Vec::new()));
        assert!(!t.accepted);
        let t = controller.document_submitted(&mut session, Ok(()));
        assert!(!t.accepted);
        assert_eq!(session, before);
    }

    #[test]
    fn answers_are_never_lost_before_reset() {
        let controller = controller();
        let mut session = to_quote_loading(&controller, ProductType::Auto);
        let answers = session.collected_answers().clone();
        controller.offers_ready(&mut session, Ok(offers(&controller, ProductType::Auto)));
        controller.submit(&mut session, "junk");
        controller.submit(&mut session, "2");
        assert_eq!(session.collected_answers(), &answers);

        let (fresh, t) = controller.reset(&session);
        assert!(fresh.collected_answers().is_empty());
        assert!(fresh.generated_offers().is_empty());
        assert_eq!(fresh.generation(), session.generation() + 1);
        assert_eq!(t.to, Stage::Greeting);
    }
}
