use crate::status::{StatusMessage, StatusPhase};
use crate::ui::{theme, Icons};
use crossbeam::channel::Receiver;
use indicatif::{HumanDuration, MultiProgress, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// Renders status messages as one percentage bar per phase.
/// Bars stay hidden when stdout is not a terminal.
pub struct StatusProgress {
    mp: MultiProgress,
    handle: Option<thread::JoinHandle<Vec<String>>>,
}

impl StatusProgress {
    pub fn new(rx: Receiver<StatusMessage>) -> Self {
        let mp = MultiProgress::new();
        let is_term = console::Term::stdout().is_term();
        let mp_clone = mp.clone();

        let handle = thread::spawn(move || {
            let mut bars: HashMap<StatusPhase, ProgressBar> = HashMap::new();
            let mut warnings = Vec::new();

            for msg in rx {
                match msg {
                    StatusMessage::Started { phase, .. } => {
                        let bar = if is_term {
                            mp_clone.add(ProgressBar::new(100))
                        } else {
                            ProgressBar::hidden()
                        };
                        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}%") {
                            bar.set_style(style);
                        }
                        bar.set_message(phase.as_str());
                        bar.enable_steady_tick(Duration::from_millis(100));
                        bars.insert(phase, bar);
                    }
                    StatusMessage::Progress { phase, percent } => {
                        if let Some(bar) = bars.get(&phase) {
                            bar.set_position(u64::from(percent));
                        }
                    }
                    StatusMessage::Migrating { .. } => {
                        if let Some(bar) = bars.get(&StatusPhase::Migrating) {
                            bar.set_message(msg.to_string());
                        }
                    }
                    StatusMessage::Finished { phase } => {
                        if let Some(bar) = bars.remove(&phase) {
                            bar.finish_with_message(format!("{} done", phase.as_str()));
                        }
                    }
                    StatusMessage::Warning(text) => warnings.push(text),
                }
            }
            warnings
        });

        Self {
            mp,
            handle: Some(handle),
        }
    }

    /// Wait for the status channel to close, then print any warnings it
    /// carried and the elapsed time
    pub fn finish(mut self, elapsed: Duration) {
        let warnings = self
            .handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        self.mp.clear().ok();
        for warning in warnings {
            crate::ui::warn(&warning);
        }
        println!(
            "{} {}",
            Icons::CLOCK.style(theme().detail.clone()),
            format!("Done in {}", HumanDuration(elapsed)).style(theme().detail.clone())
        );
    }
}

pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        if console::Term::stdout().is_term() {
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        Self { pb }
    }

    pub fn finish_with_message(&self, msg: &str) {
        self.pb.finish_with_message(msg.to_string());
    }
}
