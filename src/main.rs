//! SlotWise — headless scheduling agent.
//!
//! Commands:
//! - `slotwise run`      scheduler daemon (periodic processing batches)
//! - `slotwise process`  run one processing batch now
//! - `slotwise status`   print per-thread negotiation state
//!
//! A manual `process` is allowed to race the daemon's scheduled batch —
//! the processor's dedup guard makes the overlap harmless.

use std::sync::Arc;

use tokio::sync::mpsc;

use slotwise::ai::scheduling::LiveSchedulingAi;
use slotwise::google_api::calendar::GoogleCalendar;
use slotwise::mail::agentmail::AgentMailClient;
use slotwise::processor::ThreadProcessor;
use slotwise::scheduler::{get_next_run_time, Scheduler};
use slotwise::state::{self, AppState};
use slotwise::store::{ConversationRepository, FileStore};
use slotwise::types::{Config, ExecutionTrigger};

/// Channel buffer size for scheduler messages
const SCHEDULER_CHANNEL_SIZE: usize = 32;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());
    let code = match command.as_str() {
        "run" => run_daemon().await,
        "process" => run_once(ExecutionTrigger::Manual).await,
        "status" => print_status().await,
        "help" | "--help" | "-h" => {
            print_usage();
            0
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            2
        }
    };
    std::process::exit(code);
}

fn print_usage() {
    println!("SlotWise — email-driven meeting scheduling agent");
    println!();
    println!("Usage: slotwise <command>");
    println!();
    println!("Commands:");
    println!("  run       Start the scheduler daemon (default)");
    println!("  process   Run one processing batch now");
    println!("  status    Show per-thread negotiation state");
    println!();
    println!("Config: {}", state::config_path().display());
}

fn build_processor(config: &Config) -> ThreadProcessor {
    let api_key = config
        .agentmail
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var("AGENTMAIL_API_KEY").ok())
        .unwrap_or_default();
    if api_key.is_empty() {
        log::warn!("No AgentMail API key configured (config or AGENTMAIL_API_KEY)");
    }

    ThreadProcessor::new(
        Arc::new(AgentMailClient::new(
            api_key,
            config.agentmail.inbox_id.clone(),
        )),
        Arc::new(GoogleCalendar::default()),
        Arc::new(LiveSchedulingAi),
        Arc::new(FileStore::default()),
    )
}

fn load_config_or_fail() -> Option<Config> {
    match state::load_config() {
        Ok(Some(config)) => Some(config),
        Ok(None) => {
            log::error!(
                "No config at {} — create one before running",
                state::config_path().display()
            );
            None
        }
        Err(e) => {
            log::error!("Config at {} unreadable: {}", state::config_path().display(), e);
            None
        }
    }
}

/// Run a single processing batch and print the outcome.
async fn run_once(trigger: ExecutionTrigger) -> i32 {
    let Some(config) = load_config_or_fail() else {
        return 1;
    };

    log::info!(
        "Processing batch ({}) for inbox {}",
        trigger,
        config.agentmail.inbox_id
    );
    let processor = build_processor(&config);
    let report = processor.process_all(&config.preferences).await;

    println!(
        "Processed {} thread(s), {} error(s)",
        report.processed,
        report.errors.len()
    );
    let mut details: Vec<_> = report.details.iter().collect();
    details.sort_by(|a, b| a.0.cmp(b.0));
    for (thread_id, outcome) in details {
        println!("  {}  {}  {}", thread_id, outcome.status, outcome.action);
    }
    for error in &report.errors {
        eprintln!("  error: {}", error);
    }

    if report.errors.is_empty() {
        0
    } else {
        1
    }
}

/// Scheduler daemon: trigger messages in, processing batches out.
async fn run_daemon() -> i32 {
    let state = Arc::new(AppState::new());
    let Some(config) = state.config() else {
        log::error!(
            "No config at {} — create one before running",
            state::config_path().display()
        );
        return 1;
    };

    match get_next_run_time(&config.schedule) {
        Ok(next) => log::info!(
            "Watching inbox {} (cron '{}', next run {})",
            config.agentmail.inbox_id,
            config.schedule.cron,
            next
        ),
        Err(e) => {
            log::error!("Schedule rejected: {}", e);
            return 1;
        }
    }

    let (sender, mut receiver) = mpsc::channel(SCHEDULER_CHANNEL_SIZE);
    let scheduler = Scheduler::new(state.clone(), sender);
    tokio::spawn(async move { scheduler.run().await });

    while let Some(message) = receiver.recv().await {
        // Re-read config each batch so edits apply without a restart
        let config = match state::load_config() {
            Ok(Some(config)) => config,
            _ => {
                log::warn!("Config disappeared, skipping batch");
                continue;
            }
        };

        log::info!("Batch triggered ({})", message.trigger);
        let processor = build_processor(&config);
        let report = processor.process_all(&config.preferences).await;
        log::info!(
            "Batch done: {} processed, {} error(s)",
            report.processed,
            report.errors.len()
        );

        if matches!(
            message.trigger,
            ExecutionTrigger::Scheduled | ExecutionTrigger::Missed
        ) {
            state.set_last_scheduled_run(chrono::Utc::now());
        }
    }

    0
}

/// Print the persisted negotiation state, most recently touched first.
async fn print_status() -> i32 {
    let store = FileStore::default();
    let doc = match store.load().await {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("Failed to read store: {}", e);
            return 1;
        }
    };

    if doc.conversations.is_empty() {
        println!("No conversations yet.");
        return 0;
    }

    if let Some(last) = &doc.last_processed_at {
        println!("Last processed: {}", last);
    }
    println!();

    let mut conversations: Vec<_> = doc.conversations.values().collect();
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    for conv in conversations {
        println!(
            "{}  {}  attempts={}  {} <{}>",
            conv.thread_id, conv.status, conv.attempts, conv.sender_name, conv.sender_email
        );
        println!("    subject: {}", conv.subject);
        if let Some(slot) = &conv.selected_slot {
            println!("    slot: {}", slot.label);
        }
        if let Some(link) = &conv.calendar_event_link {
            println!("    event: {}", link);
        }
        if let Some(error) = &conv.error_message {
            println!("    error: {}", error);
        }
        println!("    updated: {}", conv.updated_at);
    }

    0
}
