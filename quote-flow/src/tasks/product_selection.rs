use crate::{
    catalog::{Catalog, ProductType},
    message::Message,
    session::ConversationSession,
    stage::Stage,
    task::{NextAction, StageTask, TaskResult},
};

/// Asks which product to quote. The choice is fixed for the rest of the
/// conversation.
pub struct ProductSelectionTask;

impl StageTask for ProductSelectionTask {
    fn prompt(&self, _session: &ConversationSession, catalog: &Catalog) -> Vec<Message> {
        vec![
            Message::system("What would you like to insure?")
                .with_options(catalog.products.iter().map(|p| p.as_str())),
        ]
    }

    fn run(&self, session: &mut ConversationSession, input: &str, catalog: &Catalog) -> TaskResult {
        let product = match input.parse::<ProductType>() {
            Ok(product) if catalog.offers_product(product) => product,
            _ => {
                return TaskResult::reprompt(Some(
                    "We don't quote that yet. Please pick one of the products below.".to_string(),
                ));
            }
        };

        session.choose_product(product);
        TaskResult::new_with_status(
            vec![Message::system(format!(
                "{} it is. A few quick questions first.",
                product.label()
            ))],
            NextAction::GoTo(Stage::AttributeCollection { step: 0 }),
            Some(format!("product selected: {product}")),
        )
    }
}
