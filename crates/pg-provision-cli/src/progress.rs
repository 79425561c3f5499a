// Load progress display using indicatif.
// The library bumps a shared counter on each commit; a background task mirrors it
// onto a spinner so the load loop never touches the terminal.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct LoadSpinner {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl LoadSpinner {
    // Start a spinner labelled with the target table that follows `counter`.
    pub fn start(table: &str, counter: Arc<AtomicU64>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_prefix(table.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));

        let ticker = bar.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            loop {
                interval.tick().await;
                ticker.set_position(counter.load(Ordering::Relaxed));
            }
        });

        Self { bar, task }
    }

    pub fn finish(self, rows: u64) {
        self.task.abort();
        self.bar.set_position(rows);
        self.bar.finish_and_clear();
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {prefix:20} {pos:>10} rows  {per_sec:>12}  {elapsed}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
