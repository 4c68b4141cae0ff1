use uuid::Uuid;

use crate::{
    catalog::Catalog,
    message::{Message, MessagePayload},
    pricing::Offer,
    session::ConversationSession,
    stage::Stage,
    task::{NextAction, StageTask, TaskResult},
};

/// Shows the generated offers and waits for the user to pick one.
pub struct QuotePresentedTask;

/// Resolves a selection given as an index, an offer id or an insurer name.
fn find_offer(offers: &[Offer], input: &str) -> Option<usize> {
    let input = input.trim();
    if let Ok(index) = input.parse::<usize>() {
        return (index < offers.len()).then_some(index);
    }
    if let Ok(id) = Uuid::parse_str(input) {
        return offers.iter().position(|o| o.id == id);
    }
    offers
        .iter()
        .position(|o| o.insurer_name.eq_ignore_ascii_case(input))
}

impl StageTask for QuotePresentedTask {
    fn prompt(&self, session: &ConversationSession, _catalog: &Catalog) -> Vec<Message> {
        let offers = session.generated_offers();
        let product = session
            .product_type()
            .map(|p| p.label().to_lowercase())
            .unwrap_or_else(|| "insurance".to_string());
        vec![
            Message::system(format!(
                "Here are {} offers for your {product}. Pick the one you like.",
                offers.len()
            ))
            .with_options(offers.iter().map(|o| o.insurer_name.clone()))
            .with_payload(MessagePayload::Offers(offers.to_vec())),
        ]
    }

    fn run(&self, session: &mut ConversationSession, input: &str, _catalog: &Catalog) -> TaskResult {
        let Some(index) = find_offer(session.generated_offers(), input) else {
            return TaskResult::reprompt(Some("Please choose one of the offers above.".to_string()));
        };

        session.select_offer(index);
        let offer = &session.generated_offers()[index];
        let message = Message::system(format!(
            "Good choice: {} {} at ${:.2}/month (${:.2}/year, deductible ${}).",
            offer.insurer_name,
            offer.plan_name,
            offer.monthly_premium,
            offer.annual_premium,
            offer.deductible
        ));
        let status = format!("offer {index} selected ({})", offer.insurer_name);
        TaskResult::new_with_status(vec![message], NextAction::GoTo(Stage::QuoteSelected), Some(status))
    }
}
