use crate::{
    catalog::{AttributeStep, Catalog},
    message::Message,
    session::ConversationSession,
    stage::Stage,
    task::{NextAction, StageTask, TaskResult},
};

/// Walks the product's attribute questions, one answer per input.
pub struct AttributeCollectionTask;

/// The step being asked, its index and the number of steps.
fn current_step<'a>(
    session: &ConversationSession,
    catalog: &'a Catalog,
) -> Option<(usize, usize, &'a AttributeStep)> {
    let Stage::AttributeCollection { step } = session.stage() else {
        return None;
    };
    let steps = catalog.attribute_steps(session.product_type()?);
    steps.get(step).map(|s| (step, steps.len(), s))
}

impl StageTask for AttributeCollectionTask {
    fn prompt(&self, session: &ConversationSession, catalog: &Catalog) -> Vec<Message> {
        match current_step(session, catalog) {
            Some((index, total, step)) => vec![
                Message::system(format!("{} ({}/{})", step.prompt, index + 1, total))
                    .with_options(step.options()),
            ],
            None => Vec::new(),
        }
    }

    fn run(&self, session: &mut ConversationSession, input: &str, catalog: &Catalog) -> TaskResult {
        let Some((index, total, step)) = current_step(session, catalog) else {
            return TaskResult::reprompt(None);
        };
        let Some(value) = step.accept(input) else {
            return TaskResult::reprompt(Some(step.correction()));
        };

        let status = format!("{} = {}", step.key, value);
        session.record_answer(&step.key, value);

        let next = if index + 1 < total {
            Stage::AttributeCollection { step: index + 1 }
        } else {
            Stage::QuoteLoading { failed: false }
        };
        TaskResult::new_with_status(Vec::new(), NextAction::GoTo(next), Some(status))
    }
}
