use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Single progress line on stderr: a bar when the run length is known, a spinner otherwise.
pub(crate) struct HumanProgress {
    inner: Mutex<Option<Bar>>,
}

struct Bar {
    kind: BarKind,
    pb: ProgressBar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarKind {
    Spinner,
    Bar,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub(crate) fn update(
        &self,
        scenario: &str,
        total: Option<Duration>,
        elapsed: Duration,
        message: String,
    ) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let kind = if total.is_some() {
            BarKind::Bar
        } else {
            BarKind::Spinner
        };
        let needs_recreate = inner.as_ref().is_some_and(|b| b.kind != kind);
        if needs_recreate && let Some(old) = inner.take() {
            old.pb.finish_and_clear();
        }
        let bar = inner.get_or_insert_with(|| new_bar(scenario, kind));

        bar.pb.set_message(message);
        match total {
            Some(total) => {
                let total_ms = total.as_millis() as u64;
                bar.pb.set_length(total_ms);
                bar.pb.set_position((elapsed.as_millis() as u64).min(total_ms));
            }
            None => bar.pb.tick(),
        }
    }

    pub(crate) fn finish(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(bar) = inner.take() {
            bar.pb.finish_and_clear();
        }
    }
}

fn new_bar(scenario: &str, kind: BarKind) -> Bar {
    let pb = match kind {
        BarKind::Bar => {
            let pb = ProgressBar::new(0);
            pb.set_style(bar_style());
            pb
        }
        BarKind::Spinner => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(spinner_style());
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        }
    };
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    pb.set_prefix(scenario.to_string());
    Bar { kind, pb }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
