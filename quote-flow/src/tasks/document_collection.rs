use crate::{
    catalog::Catalog,
    message::Message,
    session::ConversationSession,
    stage::Stage,
    task::{StageTask, TaskResult},
};

/// Asks for the checklist's current document. Only the current slot is
/// accepted; naming a later one is rejected.
pub struct DocumentCollectionTask;

impl StageTask for DocumentCollectionTask {
    fn prompt(&self, session: &ConversationSession, _catalog: &Catalog) -> Vec<Message> {
        let Some(checklist) = session.document_checklist() else {
            return Vec::new();
        };
        let Some(slot) = checklist.current_slot() else {
            return Vec::new();
        };
        match session.stage() {
            Stage::DocumentCollection { uploading: true } => {
                vec![Message::system(format!("Received your {}, checking it...", slot.label))]
            }
            _ => vec![
                Message::system(format!(
                    "Please upload your {} ({}/{}).",
                    slot.label,
                    checklist.current_slot_index() + 1,
                    checklist.slots().len()
                ))
                .with_options([slot.id.clone()]),
            ],
        }
    }

    fn run(&self, session: &mut ConversationSession, input: &str, _catalog: &Catalog) -> TaskResult {
        if session.stage() == (Stage::DocumentCollection { uploading: true }) {
            return TaskResult::reprompt(Some(
                "Still processing your last document.".to_string(),
            ));
        }
        let Some(checklist) = session.document_checklist() else {
            return TaskResult::reprompt(None);
        };
        let Some(current) = checklist.current_slot() else {
            return TaskResult::reprompt(None);
        };

        let input = input.trim();
        if current.id.eq_ignore_ascii_case(input) {
            return TaskResult::go_to(Stage::DocumentCollection { uploading: true });
        }

        let named_other = checklist
            .slots()
            .iter()
            .any(|s| s.id.eq_ignore_ascii_case(input));
        let correction = if named_other {
            format!("One at a time: we need your {} first.", current.label)
        } else {
            format!("Please upload your {}.", current.label)
        };
        TaskResult::reprompt(Some(correction))
    }
}
