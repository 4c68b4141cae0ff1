use crate::{
    catalog::Catalog,
    message::{Message, Pace},
    session::ConversationSession,
    stage::Stage,
    task::{StageTask, TaskResult},
};

pub const RETRY_OPTION: &str = "retry";

/// Waits for the offer request. After a failed request it accepts a retry.
pub struct QuoteLoadingTask;

impl StageTask for QuoteLoadingTask {
    fn prompt(&self, session: &ConversationSession, _catalog: &Catalog) -> Vec<Message> {
        match session.stage() {
            Stage::QuoteLoading { failed: true } => vec![
                Message::system("Tap retry to request your quotes again.")
                    .with_options([RETRY_OPTION]),
            ],
            _ => vec![
                Message::system("Comparing prices from our partner insurers...")
                    .paced(Pace::Loading),
            ],
        }
    }

    fn run(&self, session: &mut ConversationSession, input: &str, _catalog: &Catalog) -> TaskResult {
        match session.stage() {
            Stage::QuoteLoading { failed: true } => {
                if input.trim().eq_ignore_ascii_case(RETRY_OPTION) {
                    TaskResult::go_to(Stage::QuoteLoading { failed: false })
                } else {
                    TaskResult::reprompt(None)
                }
            }
            _ => TaskResult::reprompt(Some(
                "Still working on your quotes, one moment.".to_string(),
            )),
        }
    }
}
