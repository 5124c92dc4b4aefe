//! Human-readable status messages emitted during long maintenance work
//!
//! Messages travel over a crossbeam channel; the CLI renders them with
//! progress bars, library callers may ignore them.

use crossbeam::channel::{Receiver, Sender};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusPhase {
    Migrating,
    Sweeping,
    Resetting,
}

impl StatusPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusPhase::Migrating => "Migrating database",
            StatusPhase::Sweeping => "Cleaning up database",
            StatusPhase::Resetting => "Resetting cache",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusMessage {
    Started {
        phase: StatusPhase,
        total: usize,
    },
    /// Percentage of the current phase
    Progress {
        phase: StatusPhase,
        percent: u8,
    },
    /// A table is being migrated to `version`
    Migrating {
        table: String,
        version: u32,
    },
    Finished {
        phase: StatusPhase,
    },
    Warning(String),
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMessage::Started { phase, .. } => write!(f, "{}", phase.as_str()),
            StatusMessage::Progress { phase, percent } => {
                write!(f, "{} {}% complete", phase.as_str(), percent)
            }
            StatusMessage::Migrating { table, version } => {
                write!(f, "Migrating database to v{} ({})", version, table)
            }
            StatusMessage::Finished { phase } => write!(f, "{} done", phase.as_str()),
            StatusMessage::Warning(msg) => write!(f, "{}", msg),
        }
    }
}

/// Sending half of the status channel; a disabled sink drops everything
#[derive(Clone, Debug, Default)]
pub struct StatusSink {
    tx: Option<Sender<StatusMessage>>,
}

impl StatusSink {
    pub fn channel() -> (Self, Receiver<StatusMessage>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, msg: StatusMessage) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening
            let _ = tx.send(msg);
        }
    }

    pub fn progress(&self, phase: StatusPhase, done: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            ((done.min(total) * 100) / total) as u8
        };
        self.send(StatusMessage::Progress { phase, percent });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let (sink, rx) = StatusSink::channel();
        sink.progress(StatusPhase::Sweeping, 1, 4);
        sink.progress(StatusPhase::Sweeping, 0, 0);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.to_string(), "Cleaning up database 25% complete");
        assert_eq!(
            rx.try_recv().unwrap(),
            StatusMessage::Progress { phase: StatusPhase::Sweeping, percent: 100 }
        );
    }

    #[test]
    fn test_disabled_sink_drops_messages() {
        let sink = StatusSink::disabled();
        sink.send(StatusMessage::Warning("ignored".to_string()));
    }
}
