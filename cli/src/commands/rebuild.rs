use docindex_core::{IndexEvent, ProgressSnapshot, RebuildOutcome, SummaryEvent};

use super::build_coordinator;
use crate::config::AppConfig;

/// Runs a single rebuild against the configured root, printing progress until
/// its summary arrives. Ctrl-C requests cancellation of the session.
pub async fn handle_rebuild(config: &AppConfig, json: bool) -> Result<(), String> {
    let coordinator = build_coordinator(config);
    let mut subscription = coordinator.subscribe(None);
    let session = coordinator
        .start_rebuild()
        .map_err(|e| format!("Failed to start rebuild: {}", e))?;

    if !json {
        println!(
            "Rebuild {} started for {}",
            session.id(),
            config.root.display()
        );
    }

    let summary = loop {
        tokio::select! {
            envelope = subscription.recv() => {
                let Some(envelope) = envelope else {
                    return Err("Event stream closed before the rebuild finished".to_string());
                };

                if json {
                    let line = serde_json::to_string(&envelope)
                        .map_err(|e| format!("Failed to serialize event: {}", e))?;
                    println!("{line}");
                }

                match envelope.event {
                    IndexEvent::Progress(snapshot) if !json => {
                        println!("{}", format_progress(&snapshot));
                    }
                    IndexEvent::Summary(summary) if summary.session_id == session.id() => {
                        break summary;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c(), if !session.is_cancelled() => {
                eprintln!("Cancelling rebuild {}...", session.id());
                coordinator
                    .cancel_rebuild(session.id())
                    .map_err(|e| format!("Failed to cancel rebuild: {}", e))?;
            }
        }
    };

    if !json {
        for record in coordinator.store().failures() {
            println!(
                "  failed {}: {}",
                record.id,
                record.failure_reason.as_deref().unwrap_or("unknown reason")
            );
        }
        println!("{}", format_summary(&summary));
    }

    match summary.outcome {
        RebuildOutcome::Aborted { reason } => Err(format!("Rebuild aborted: {}", reason)),
        _ => Ok(()),
    }
}

pub(crate) fn format_progress(snapshot: &ProgressSnapshot) -> String {
    format!(
        "[{:>5.1}%] {}/{} processed ({} indexed, {} failed)",
        snapshot.percent_complete,
        snapshot.processed,
        snapshot.counters.total,
        snapshot.counters.indexed,
        snapshot.counters.failed
    )
}

pub(crate) fn format_summary(summary: &SummaryEvent) -> String {
    let elapsed = (summary.finished_at - summary.started_at)
        .to_std()
        .unwrap_or_default();
    format!(
        "Rebuild {}: {} of {} documents processed, {} indexed, {} failed in {:.2}s",
        summary.outcome.as_str().replace('_', " "),
        summary.processed,
        summary.counters.total,
        summary.counters.indexed,
        summary.counters.failed,
        elapsed.as_secs_f64()
    )
}
