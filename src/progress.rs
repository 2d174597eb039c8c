//! Reconcile progress rendering.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.
//! Human mode prints one line per phase; JSON mode prints one object per
//! line in the shape of [`ProgressEvent`].

use std::io::Write;

use repo_chat_core::progress::{NoProgress, ProgressEvent, ProgressReporter, ReconcilePhase};

/// Human-friendly progress: `reconcile api  embedding  3 / 12 batches`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!("reconcile {}  {}\n", event.project_id, describe(&event.phase));
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

fn describe(phase: &ReconcilePhase) -> String {
    match phase {
        ReconcilePhase::Scanning => "scanning...".to_string(),
        ReconcilePhase::Extracting { files } => {
            format!("extracting  {} files", format_number(*files as u64))
        }
        ReconcilePhase::Diffing { chunks } => {
            format!("diffing  {} chunks", format_number(*chunks as u64))
        }
        ReconcilePhase::Embedding { done, total } => format!(
            "embedding  {} / {} batches",
            format_number(*done as u64),
            format_number(*total as u64)
        ),
        ReconcilePhase::Applying { done, total } => format!(
            "applying  {} / {} batches",
            format_number(*done as u64),
            format_number(*total as u64)
        ),
        ReconcilePhase::Deleting { chunks } => {
            format!("deleting  {} chunks", format_number(*chunks as u64))
        }
        ReconcilePhase::Completed => "completed".to_string(),
        ReconcilePhase::Failed { reason } => format!("failed: {}", reason),
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let mut obj = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(_) => return,
        };
        obj["event"] = serde_json::json!("progress");
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn describe_phases() {
        assert_eq!(
            describe(&ReconcilePhase::Embedding { done: 3, total: 1200 }),
            "embedding  3 / 1,200 batches"
        );
        assert_eq!(
            describe(&ReconcilePhase::Failed { reason: "boom".into() }),
            "failed: boom"
        );
    }
}
