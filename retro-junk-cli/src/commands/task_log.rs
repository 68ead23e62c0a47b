use std::path::{Path, PathBuf};

use retro_junk_scraper::task_log::{summarize, write_report, write_report_to};
use retro_junk_scraper::{TaskId, TaskLogStore, default_task_log_dir};

use crate::commands::load_config;
use crate::error::CliError;

/// Print (or save) the log of a finished task.
pub(crate) fn run_log(
    task: TaskId,
    output: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    let dir = config
        .task_log_dir
        .or_else(default_task_log_dir)
        .ok_or_else(|| CliError::other("Could not determine the task log directory"))?;

    let store = TaskLogStore::on_disk(&dir)?;
    let entries = store.read(task)?;
    if entries.is_empty() {
        return Err(CliError::other(format!(
            "No log found for task {} in {}",
            task,
            dir.display()
        )));
    }

    match output {
        Some(path) => {
            write_report(&entries, &path)?;
            let summary = summarize(&entries);
            log::info!(
                "Wrote {} entries ({} succeeded, {} failed) to {}",
                entries.len(),
                summary.succeeded,
                summary.failed,
                path.display()
            );
        }
        None => {
            let stdout = std::io::stdout();
            write_report_to(&entries, &mut stdout.lock())?;
        }
    }
    Ok(())
}
