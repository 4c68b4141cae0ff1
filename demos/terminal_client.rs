use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use quote_flow::{
    Catalog, ConversationRunner, FlowConfig, Message, MessagePayload, MessageRole,
    SimulatedBackend,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Duration, sleep};

/// Chat with the quote engine from the terminal.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Seed for offer pricing; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the typing and loading delays
    #[arg(long)]
    instant: bool,

    /// Catalog JSON to use instead of the built-in one
    #[arg(long)]
    catalog: Option<String>,

    /// Print tracing output to stderr
    #[arg(long)]
    verbose: bool,
}

fn print_message(message: &Message) {
    match message.role {
        MessageRole::User => println!("you > {}", message.content),
        MessageRole::System if message.is_error => println!("bot ! {}", message.content),
        MessageRole::System => println!("bot > {}", message.content),
    }
    match &message.payload {
        Some(MessagePayload::Offers(offers)) => {
            for (i, offer) in offers.iter().enumerate() {
                println!(
                    "      [{i}] {:<12} {:<8} {:>8.2}/mo {:>9.2}/yr  deductible {}",
                    offer.insurer_name,
                    offer.plan_name,
                    offer.monthly_premium,
                    offer.annual_premium,
                    offer.deductible
                );
                let covered: Vec<&str> = offer.included_coverage().collect();
                println!("          covers: {}", covered.join(", "));
            }
        }
        Some(MessagePayload::Finalized(record)) => {
            if let Ok(json) = serde_json::to_string_pretty(record) {
                println!("{json}");
            }
        }
        None => {}
    }
    if !message.options.is_empty() {
        println!("      options: {}", message.options.join(" | "));
    }
}

/// Prints messages as the scheduler delivers them, until input is enabled.
async fn follow(runner: &ConversationRunner, session_id: &str, printed: &mut usize) {
    let mut typing_shown = false;
    loop {
        let transcript = runner.transcript(session_id);
        for message in &transcript[(*printed).min(transcript.len())..] {
            print_message(message);
            typing_shown = false;
        }
        *printed = transcript.len();

        let snapshot = runner.snapshot(session_id).await;
        let Ok(snapshot) = snapshot else { return };
        if snapshot.input.input_enabled {
            return;
        }
        if snapshot.input.typing && !typing_shown {
            println!("bot is typing...");
            typing_shown = true;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.verbose {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter("quote_flow=debug")
            .init();
    }

    let catalog = match &args.catalog {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            Catalog::from_json(&json)?
        }
        None => Catalog::default(),
    };
    let catalog = Arc::new(catalog);
    let config = if args.instant {
        FlowConfig::instant()
    } else {
        FlowConfig::default()
    };
    let backend = match args.seed {
        Some(seed) => SimulatedBackend::seeded(catalog.clone(), seed),
        None => SimulatedBackend::new(catalog.clone()),
    };
    let runner = ConversationRunner::with_backend(catalog, config, Arc::new(backend))?;

    let session = runner.start().await?;
    let session_id = session.id().to_string();
    println!("Session {session_id}. Type /reset to start over, /quit to leave.");

    let mut printed = 0;
    follow(&runner, &session_id, &mut printed).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "/quit" => break,
            "/reset" => {
                runner.reset(&session_id).await?;
                printed = 0;
            }
            _ => {
                if let Err(e) = runner.submit(&session_id, line).await {
                    println!("(not sent: {e})");
                }
            }
        }
        follow(&runner, &session_id, &mut printed).await;
    }

    let leads = runner.leads().await?;
    println!("{} lead(s) handed off", leads.len());
    Ok(())
}
