//! Logger setup. Normal output goes through `log::info!`, so the level
//! picked here is also what the user sees.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::LevelFilter;

/// Scraper internals mirror every task log line; keep them out of normal
/// output unless verbose.
const LIBRARY_TARGET: &str = "retro_junk_scraper";

pub(crate) fn init(quiet: bool, verbose: bool, logfile: Option<&Path>) -> std::io::Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if !verbose {
        builder.filter_module(LIBRARY_TARGET, LevelFilter::Warn);
    }
    // RUST_LOG still wins for targeted debugging.
    builder.parse_default_env();

    if verbose {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });
    } else {
        builder.format(|buf, record| match record.level() {
            log::Level::Info => writeln!(buf, "{}", record.args()),
            level => writeln!(buf, "{}: {}", level, record.args()),
        });
    }

    if let Some(path) = logfile {
        let file = File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(
            strip_ansi_escapes::Writer::new(file),
        )));
    }

    builder.init();
    Ok(())
}
