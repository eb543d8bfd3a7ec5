//! Analysis progress reporting.
//!
//! Reports observable progress during `chk analyze` so users see how many
//! chunks a document produced and how many have been analyzed. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for one analysis batch.
#[derive(Clone, Debug, PartialEq)]
pub enum AnalysisProgressEvent {
    /// The document was split into `chunks` chunks.
    Chunked { chunks: usize },
    /// `n` of `total` chunk pipelines have finished; `failed` of them
    /// produced an error marker.
    Analyzed { n: usize, total: usize, failed: usize },
}

/// Receives progress events from the orchestrator.
///
/// Called from the single result collector, never concurrently.
pub trait AnalysisProgressReporter: Send + Sync {
    fn report(&self, event: AnalysisProgressEvent);
}

/// Human-friendly progress on stderr: "analyze  12 / 40 chunks  (1 failed)".
pub struct StderrProgress;

impl AnalysisProgressReporter for StderrProgress {
    fn report(&self, event: AnalysisProgressEvent) {
        let line = match &event {
            AnalysisProgressEvent::Chunked { chunks } => {
                format!("chunk    {} chunks\n", format_number(*chunks))
            }
            AnalysisProgressEvent::Analyzed { n, total, failed } => {
                let mut line = format!(
                    "analyze  {} / {} chunks",
                    format_number(*n),
                    format_number(*total)
                );
                if *failed > 0 {
                    line.push_str(&format!("  ({} failed)", format_number(*failed)));
                }
                line.push('\n');
                line
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl AnalysisProgressReporter for JsonProgress {
    fn report(&self, event: AnalysisProgressEvent) {
        let obj = event_json(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn event_json(event: &AnalysisProgressEvent) -> serde_json::Value {
    match event {
        AnalysisProgressEvent::Chunked { chunks } => serde_json::json!({
            "event": "progress",
            "phase": "chunked",
            "chunks": chunks
        }),
        AnalysisProgressEvent::Analyzed { n, total, failed } => serde_json::json!({
            "event": "progress",
            "phase": "analyzing",
            "n": n,
            "total": total,
            "failed": failed
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl AnalysisProgressReporter for NoProgress {
    fn report(&self, _event: AnalysisProgressEvent) {}
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Parse a `--progress` value. `auto` picks human on a TTY, otherwise off.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "auto" => Ok(Self::default_for_tty()),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            "off" => Ok(ProgressMode::Off),
            other => anyhow::bail!(
                "Unknown progress mode: '{}'. Use auto, human, json, or off.",
                other
            ),
        }
    }

    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn AnalysisProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
