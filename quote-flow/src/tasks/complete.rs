use crate::{
    catalog::Catalog,
    message::Message,
    session::ConversationSession,
    task::{StageTask, TaskResult},
};

/// Terminal stage. Any further input only repeats the closing notice.
pub struct CompleteTask;

impl StageTask for CompleteTask {
    fn prompt(&self, session: &ConversationSession, _catalog: &Catalog) -> Vec<Message> {
        let content = match session.selected_offer() {
            Some(offer) => format!(
                "You're all set! An advisor will contact you shortly to issue your {} {} policy.",
                offer.insurer_name, offer.plan_name
            ),
            None => "You're all set! An advisor will contact you shortly.".to_string(),
        };
        vec![Message::system(content)]
    }

    fn run(&self, _session: &mut ConversationSession, _input: &str, _catalog: &Catalog) -> TaskResult {
        TaskResult::reprompt(None)
    }
}
