//! `colony run`: spawn the configured workers and keep them running.

use colony_core::{ActionGate, Gated};
use colony_runtime::{AgentSupervisor, HandlerTable, Message};
use colony_security::{AuditLogger, AuditSink, AuditedGate, PolicyGate, TracingSink};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub async fn run(
    path: Option<&Path>,
    tasks: Vec<String>,
    duration_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    if config.workers.is_empty() {
        println!("⚠️  No [[workers]] configured; the supervisor will run with an empty pool");
    }

    let store = super::open_store(&config).await?;
    let sinks: Vec<Box<dyn AuditSink>> = vec![Box::new(TracingSink)];
    let audit = Arc::new(AuditLogger::with_sinks(1000, sinks));
    let gate: Arc<dyn ActionGate> = Arc::new(AuditedGate::new(
        Arc::new(PolicyGate::from_config(&config.gate)),
        audit.clone(),
    ));

    let supervisor = AgentSupervisor::new(&config, store, gate, HandlerTable::echo());

    for spec in config.workers.clone() {
        let name = spec.name.clone();
        match supervisor.spawn_worker(spec).await {
            Ok(Gated::Allowed(id)) => println!("🐝 Spawned {name} ({id})"),
            Ok(Gated::Denied { reason }) => println!("🚫 {name} denied: {reason}"),
            Err(e) => warn!(worker = %name, error = %e, "Failed to spawn worker"),
        }
    }
    supervisor.start_background_loops();

    for task in &tasks {
        let delivered = supervisor
            .broadcast_message(Message::task(serde_json::json!({ "text": task })))
            .await;
        info!(task = %task, workers = delivered, "Task broadcast");
    }

    match duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            println!("Running. Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;
        }
    }

    let statuses = supervisor.get_all_statuses().await;
    supervisor.shutdown().await?;
    let dead_letters = supervisor.drain_dead_letters();

    println!();
    println!("{:<20} {:<14} {:<11} {:>7} {:>6}", "WORKER", "SPECIALIZATION", "STATUS", "HISTORY", "LINKS");
    for s in &statuses {
        println!(
            "{:<20} {:<14} {:<11} {:>7} {:>6}",
            s.name,
            s.specialization,
            s.status.to_string(),
            s.history_len,
            s.connections.len()
        );
    }
    if !dead_letters.is_empty() {
        println!();
        println!("☠️  {} dead-lettered tasks", dead_letters.len());
        for letter in &dead_letters {
            println!("  {}  {}  {}", letter.worker_id, letter.task.summary(), letter.error);
        }
    }
    println!("Gate decisions audited: {}", audit.count());
    Ok(())
}
