//! 📊 progress.rs: "Are we there yet?" asked every pipeline, ever.
//!
//! Two halves:
//! - [`ProgressTracker`] owns the counters. It is fed outcomes by the pipeline driver, one
//!   caller at a time, and publishes each new [`ProgressSnapshot`] on a `watch` channel.
//!   Watch keeps only the latest value, so a slow renderer just skips frames.
//! - [`ProgressDisplay`] is the terminal side: an indicatif bar with a comfy-table body,
//!   docs/s over a sliding window, and an ETA when the source knows how big it is.
//!
//! ⚠️ Watching the progress bar will not make it go faster. We've tried. 🦆

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::Outcome;

/// 📸 Counters at a point in time. `attempted == succeeded + failed`, always.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// 🧮 The one and only writer of the run's counters.
///
/// Not internally synchronized. The driver loop is the sole caller of [`record`]; in
/// concurrent mode submission tasks send their outcomes back to that loop instead of
/// touching the tracker.
///
/// [`record`]: ProgressTracker::record
#[derive(Debug)]
pub struct ProgressTracker {
    snapshot: ProgressSnapshot,
    publisher: watch::Sender<ProgressSnapshot>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(ProgressSnapshot::default());
        Self {
            snapshot: ProgressSnapshot::default(),
            publisher,
        }
    }

    /// 📡 A receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.publisher.subscribe()
    }

    /// 🔄 Back to zero. Only the driver calls this, once, at pipeline start.
    pub fn reset(&mut self) {
        self.snapshot = ProgressSnapshot::default();
        self.publisher.send_replace(self.snapshot);
    }

    /// ➕ Fold outcomes into the counters and publish the result.
    pub fn record(&mut self, outcomes: &[Outcome]) -> ProgressSnapshot {
        let succeeded = outcomes.iter().filter(|outcome| outcome.ok).count() as u64;
        let failed = outcomes.len() as u64 - succeeded;

        self.snapshot.attempted += outcomes.len() as u64;
        self.snapshot.succeeded += succeeded;
        self.snapshot.failed += failed;

        // -- 📡 send_replace never fails, even with zero subscribers
        self.publisher.send_replace(self.snapshot);
        self.snapshot
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
    }

    /// 🏁 The end-of-run numbers. Same as the last snapshot, by definition.
    pub fn finalize(&self) -> ProgressSnapshot {
        self.snapshot
    }
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls. Order pizza. Plural.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 🎨 Terminal rendering of a run's progress.
///
/// Rates come from a 5-second sliding window of `(instant, attempted)` samples so a
/// single slow batch doesn't make the docs/s number look like a seismograph.
pub struct ProgressDisplay {
    /// 🏷️ what we're filling, usually the index name
    label: String,
    /// 📏 how many documents the source says it has, if it knows
    total: Option<u64>,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
    last: ProgressSnapshot,
}

impl std::fmt::Debug for ProgressDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressDisplay")
            .field("label", &self.label)
            .field("total", &self.total)
            .field("last", &self.last)
            .finish()
    }
}

impl ProgressDisplay {
    pub fn new(label: impl Into<String>, total: Option<u64>) -> Self {
        let progress_bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                // -- 🐛 template is a literal; if it ever fails to parse we fall back to the default look
                if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
                    bar.set_style(style.progress_chars("=>-"));
                }
                bar
            }
            None => {
                let spinner = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
                    spinner.set_style(style);
                }
                spinner.enable_steady_tick(Duration::from_millis(120));
                spinner
            }
        };

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0));

        Self {
            label: label.into(),
            total,
            progress_bar,
            rate_samples,
            start_time,
            last: ProgressSnapshot::default(),
        }
    }

    /// 🔄 Render a fresh snapshot.
    pub fn update(&mut self, snapshot: ProgressSnapshot) {
        self.last = snapshot;
        let docs_per_sec = self.docs_per_sec();
        self.render(docs_per_sec);
        self.progress_bar.set_position(snapshot.attempted);
    }

    /// ✅ Final frame. Leaves the last table on screen.
    pub fn finish(&self) {
        self.progress_bar.finish();
    }

    fn docs_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.last.attempted));

        if let Some(&(oldest_time, oldest_attempted)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                return self.last.attempted.saturating_sub(oldest_attempted) as f64 / elapsed;
            }
        }
        0.0
    }

    /// 🎨 Layout:
    /// ```text
    /// index: <label>
    ///   <docs/s>        <succeeded / attempted indexed>
    ///   <failed>        <percent of total>
    ///   <elapsed>       <remaining>
    /// ```
    fn render(&self, docs_per_sec: f64) {
        let snapshot = self.last;
        let elapsed = self.start_time.elapsed();

        let (percent, remaining) = match self.total {
            Some(total) if total > 0 => {
                let percent = (snapshot.attempted as f64 / total as f64) * 100.0;
                let remaining = if docs_per_sec > 0.0 && snapshot.attempted < total {
                    // -- 🔮 linear extrapolation, assumes the future looks like the last five seconds
                    let left = (total - snapshot.attempted) as f64 / docs_per_sec;
                    format_duration(Duration::from_secs_f64(left))
                } else {
                    "--:--".to_string()
                };
                (format!("{:.2}%", percent), remaining)
            }
            _ => ("--%".to_string(), "--:--".to_string()),
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Docs/s", format_number(docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {} indexed",
                format_number(snapshot.succeeded),
                format_number(snapshot.attempted)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} failed", format_number(snapshot.failed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(percent).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("index: {}\n{}", self.label, table));
    }
}

/// 🧵 Render snapshots from `updates` until the tracker behind it is dropped.
///
/// Updates arriving faster than we draw are coalesced by the watch channel.
pub fn spawn_display(
    label: impl Into<String>,
    total: Option<u64>,
    mut updates: watch::Receiver<ProgressSnapshot>,
) -> JoinHandle<()> {
    let mut display = ProgressDisplay::new(label, total);
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = *updates.borrow_and_update();
            display.update(snapshot);
        }
        // -- 🏁 publisher gone; draw whatever it left behind and bow out
        let last = *updates.borrow();
        display.update(last);
        display.finish();
    })
}
