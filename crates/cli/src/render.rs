//! Human-readable lines for the run's event stream.

use colored::Colorize;
use events::{Event, EventEnvelope};

/// Render one event as a terminal line. Returns `None` for events that are
/// only interesting to machine observers.
pub fn render(envelope: &EventEnvelope) -> Option<String> {
    let line = match &envelope.event {
        Event::RunStarted {
            run_id,
            topic,
            stage_count,
        } => format!(
            "{} {} ({} stages, run {})",
            "▶".bold(),
            topic.bold(),
            stage_count,
            run_id
        ),
        Event::ArtifactsCleared { removed, .. } if removed.is_empty() => return None,
        Event::ArtifactsCleared { removed, .. } => {
            format!("  {} removed {} stale file(s)", "·".dimmed(), removed.len())
        }
        Event::StageStarted { stage, index, .. } => {
            format!("{} [{}] {}", "◐".cyan(), index + 1, stage)
        }
        Event::StageCompleted {
            stage, duration_ms, ..
        } => format!(
            "{} {} {}",
            "●".green(),
            stage,
            format!("({:.1}s)", *duration_ms as f64 / 1000.0).dimmed()
        ),
        Event::ArtifactCommitted { name, .. } => format!("  {} {}", "+".green(), name),
        Event::ToolRetry {
            tool,
            attempt,
            max_attempts,
            delay_ms,
            error,
            ..
        } => format!(
            "  {} {} attempt {}/{} failed, retrying in {}ms: {}",
            "↻".yellow(),
            tool,
            attempt,
            max_attempts,
            delay_ms,
            error
        ),
        Event::ApprovalRequested {
            stage,
            prompt,
            deadline,
            ..
        } => {
            let mut line = format!(
                "\n{} {} {}\n  {} ",
                "?".yellow().bold(),
                format!("[{}]", stage).yellow(),
                prompt,
                "(yes/no)".dimmed()
            );
            if let Some(deadline) = deadline {
                let until = format!("before {}", deadline.format("%H:%M:%S"));
                line.push_str(&format!("{} ", until.dimmed()));
            }
            line
        }
        Event::ApprovalReprompted { reply, .. } => format!(
            "  {} '{}' is not a decision, answer yes or no: ",
            "?".yellow(),
            reply
        ),
        Event::ApprovalResolved {
            stage, resolution, ..
        } => format!("  {} {} {}", "✓".dimmed(), stage, resolution),
        Event::RunCompleted { artifacts, .. } => format!(
            "\n{} Completed with {} artifact(s)",
            "✔".green().bold(),
            artifacts.len()
        ),
        Event::RunFailed {
            stage,
            error_kind,
            message,
            ..
        } => format!(
            "\n{} Failed at {} [{}]: {}",
            "✖".red().bold(),
            stage.as_deref().unwrap_or("startup"),
            error_kind,
            message
        ),
        Event::RunCancelled { stage, reason, .. } => format!(
            "\n{} Cancelled at {}: {}",
            "■".yellow().bold(),
            stage.as_deref().unwrap_or("startup"),
            reason
        ),
    };
    Some(line)
}
