use crate::{
    catalog::Catalog, message::Message, session::ConversationSession, stage::Stage,
};

/// Result of handling one input at one stage
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Messages to show the user before any stage-entry prompt
    pub messages: Vec<Message>,
    /// Next action to take
    pub next_action: NextAction,
    /// Short description for logs
    pub status_message: Option<String>,
}

/// Defines what should happen after a stage task handles input
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// Move to the given stage and emit its prompt
    GoTo(Stage),
    /// Input accepted; stay put until an async completion arrives
    WaitForCompletion,
    /// Input rejected; nothing changed, re-emit the current prompt
    Reprompt,
}

impl TaskResult {
    pub fn new(messages: Vec<Message>, next_action: NextAction) -> Self {
        Self {
            messages,
            next_action,
            status_message: None,
        }
    }

    pub fn new_with_status(
        messages: Vec<Message>,
        next_action: NextAction,
        status_message: Option<String>,
    ) -> Self {
        Self {
            messages,
            next_action,
            status_message,
        }
    }

    pub fn go_to(stage: Stage) -> Self {
        Self::new(Vec::new(), NextAction::GoTo(stage))
    }

    /// Rejects the input, optionally explaining why.
    pub fn reprompt(correction: Option<String>) -> Self {
        let messages = correction.map(Message::system).into_iter().collect();
        Self::new(messages, NextAction::Reprompt)
    }
}

/// Handler for the stages that wait on user input.
///
/// A task may only touch the session through the crate's forward-only
/// mutators, and must leave it untouched when it returns
/// [`NextAction::Reprompt`].
pub trait StageTask: Send + Sync {
    /// Unique identifier for this task
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Messages that introduce (or re-introduce) the stage.
    fn prompt(&self, session: &ConversationSession, catalog: &Catalog) -> Vec<Message>;

    /// Handle one user input.
    fn run(&self, session: &mut ConversationSession, input: &str, catalog: &Catalog) -> TaskResult;
}
