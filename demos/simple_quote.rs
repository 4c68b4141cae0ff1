use quote_flow::{
    Catalog, ConversationRunner, FlowConfig, MessagePayload, SimulatedBackend, Stage,
};
use std::sync::Arc;

// Drives one auto quote from greeting to completion with canned answers:
// 1. start, pick the product, answer the five vehicle questions
// 2. take the cheapest of the offers
// 3. upload every requested document in order
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Arc::new(Catalog::default());
    // a fixed seed so every run prices the same offers
    let backend = Arc::new(SimulatedBackend::seeded(catalog.clone(), 2024));
    let runner = ConversationRunner::with_backend(catalog, FlowConfig::instant(), backend)?;

    let session = runner.start().await?;
    let id = session.id().to_string();
    runner.wait_idle(&id).await;

    for input in ["start", "auto", "Toyota", "Corolla", "2023", "personal", "full"] {
        runner.submit(&id, input).await?;
        runner.wait_idle(&id).await;
    }

    let session = runner.snapshot(&id).await?.session;
    let cheapest = session
        .generated_offers()
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.monthly_premium.total_cmp(&b.1.monthly_premium))
        .map(|(i, _)| i)
        .ok_or("no offers generated")?;
    runner.submit(&id, &cheapest.to_string()).await?;
    runner.wait_idle(&id).await;

    // the prompt always names the one document it wants next
    loop {
        let session = runner.snapshot(&id).await?.session;
        if session.stage() == Stage::Complete {
            break;
        }
        let slot = session
            .document_checklist()
            .and_then(|c| c.current_slot())
            .map(|s| s.id.clone())
            .ok_or("no document requested")?;
        runner.submit(&id, &slot).await?;
        runner.wait_idle(&id).await;
    }

    for message in runner.transcript(&id) {
        println!("{:?}: {}", message.role, message.content);
        if let Some(MessagePayload::Finalized(record)) = &message.payload {
            println!(
                "Finalized {} with {} ({} {:.2}/mo)",
                record.product_type,
                record.selected_offer.insurer_name,
                record.selected_offer.plan_name,
                record.selected_offer.monthly_premium
            );
        }
    }
    Ok(())
}
