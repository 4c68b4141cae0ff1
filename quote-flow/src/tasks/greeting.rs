use tracing::debug;

use crate::{
    catalog::Catalog,
    message::Message,
    session::ConversationSession,
    stage::Stage,
    task::{StageTask, TaskResult},
};

pub const START_OPTION: &str = "start";

/// Opening message; waits for the user to start a quote.
pub struct GreetingTask;

impl StageTask for GreetingTask {
    fn prompt(&self, _session: &ConversationSession, _catalog: &Catalog) -> Vec<Message> {
        vec![
            Message::system(
                "Hi! I compare offers from several insurers and get you a quote in a couple of minutes.",
            )
            .with_options([START_OPTION]),
        ]
    }

    fn run(&self, session: &mut ConversationSession, input: &str, _catalog: &Catalog) -> TaskResult {
        if input.trim().eq_ignore_ascii_case(START_OPTION) {
            debug!(session_id = %session.id(), "Quote started");
            return TaskResult::go_to(Stage::ProductSelection);
        }
        TaskResult::reprompt(Some(format!(
            "Tap \"{START_OPTION}\" whenever you're ready."
        )))
    }
}
