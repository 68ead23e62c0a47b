//! Progress bars for running tasks, driven by progress events.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use owo_colors::Stream::Stderr;

use retro_junk_scraper::{ProgressEvent, TaskId, TaskStatus};

/// One bar per task, created on the first event seen for it.
pub(crate) struct TaskBars {
    mp: MultiProgress,
    bars: HashMap<TaskId, ProgressBar>,
    style: ProgressStyle,
}

impl TaskBars {
    /// When `quiet` is true, all bars are hidden.
    pub(crate) fn new(quiet: bool) -> Self {
        let mp = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} {prefix:<24} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
        .tick_chars("/-\\|");
        Self {
            mp,
            bars: HashMap::new(),
            style,
        }
    }

    /// Register a task's bar up front so bars appear in submission order.
    pub(crate) fn add(&mut self, id: TaskId, label: String, total: usize) {
        let pb = self.mp.add(ProgressBar::new(total as u64));
        pb.set_style(self.style.clone());
        pb.set_prefix(label);
        pb.set_message("queued");
        pb.enable_steady_tick(Duration::from_millis(100));
        self.bars.insert(id, pb);
    }

    pub(crate) fn update(&self, event: &ProgressEvent) {
        let Some(pb) = self.bars.get(&event.task_id) else {
            return;
        };
        pb.set_position((event.completed + event.failed) as u64);

        let failed = if event.failed > 0 {
            format!(" ({} failed)", event.failed)
        } else {
            String::new()
        };
        match event.status {
            TaskStatus::Queued => pb.set_message("queued"),
            TaskStatus::Running => pb.set_message(format!(
                "{}{}",
                event.current_item.as_deref().unwrap_or(""),
                failed
            )),
            TaskStatus::Cancelling => pb.set_message(format!("cancelling...{}", failed)),
            TaskStatus::Completed => pb.finish_with_message(format!(
                "{}{}",
                "done".if_supports_color(Stderr, |t| t.green()),
                failed
            )),
            TaskStatus::Failed => pb.abandon_with_message(format!(
                "{}{}",
                "failed".if_supports_color(Stderr, |t| t.red()),
                failed
            )),
            TaskStatus::Cancelled => pb.abandon_with_message(format!(
                "{}{}",
                "cancelled".if_supports_color(Stderr, |t| t.yellow()),
                failed
            )),
        }
    }
}
