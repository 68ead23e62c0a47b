//! Artwork generation: composing a mix image from media a record already
//! has. Runs as a blocking step at the end of an artwork task.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ArtworkError;
use crate::media::MediaKind;
use crate::record::GameRecord;

/// Produces an artwork file for a record.
pub trait ArtworkGenerator: Send + Sync {
    /// Write artwork to `output`. Returns `Ok(false)` when the record lacks
    /// the source media needed.
    fn generate(&self, record: &GameRecord, output: &Path) -> Result<bool, ArtworkError>;
}

/// Runs an external image tool.
///
/// Arguments may contain placeholders that are replaced per record:
/// `{output}`, `{system}`, `{game}`, and one per media kind using its
/// directory name (`{covers}`, `{screenshots}`, `{marquees}`, ...). A
/// media placeholder whose file the record lacks makes the record
/// ineligible.
///
/// ```toml
/// [artwork]
/// command = "magick"
/// args = ["{screenshots}", "{covers}", "-gravity", "southwest", "-composite", "{output}"]
/// ```
pub struct CommandGenerator {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Expand placeholders, or `None` if a referenced media file is missing.
    fn expand_args(&self, record: &GameRecord, output: &Path) -> Option<Vec<String>> {
        self.args
            .iter()
            .map(|arg| {
                let mut arg = arg
                    .replace("{output}", &output.to_string_lossy())
                    .replace("{system}", &record.system)
                    .replace("{game}", &record.id);
                for kind in MediaKind::ALL {
                    let placeholder = format!("{{{}}}", kind.subdir());
                    if arg.contains(&placeholder) {
                        let path = record.media.get(&kind).filter(|p| p.exists())?;
                        arg = arg.replace(&placeholder, &path.to_string_lossy());
                    }
                }
                Some(arg)
            })
            .collect()
    }
}

impl ArtworkGenerator for CommandGenerator {
    fn generate(&self, record: &GameRecord, output: &Path) -> Result<bool, ArtworkError> {
        let Some(args) = self.expand_args(record, output) else {
            log::debug!("{}/{}: missing source media for artwork", record.system, record.id);
            return Ok(false);
        };
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = Command::new(&self.program).args(&args).output()?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ArtworkError::Render(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                stderr.trim()
            )));
        }
        if !output.exists() {
            return Err(ArtworkError::Render(format!(
                "{} did not write {}",
                self.program.display(),
                output.display()
            )));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_cover(dir: &Path) -> GameRecord {
        let cover = dir.join("cover.png");
        std::fs::write(&cover, b"png").unwrap();
        let mut record = GameRecord::new("nes", "smb", "Super Mario Bros.");
        record.media.insert(MediaKind::Cover, cover);
        record
    }

    #[test]
    fn test_expand_args() {
        let dir = tempfile::tempdir().unwrap();
        let record = record_with_cover(dir.path());
        let output = dir.path().join("out.png");
        let generator = CommandGenerator::new(
            "magick",
            vec!["{covers}".into(), "{system}-{game}".into(), "{output}".into()],
        );
        let args = generator.expand_args(&record, &output).unwrap();
        assert_eq!(args[0], dir.path().join("cover.png").to_string_lossy());
        assert_eq!(args[1], "nes-smb");
        assert_eq!(args[2], output.to_string_lossy());

        let needs_screenshot = CommandGenerator::new("magick", vec!["{screenshots}".into()]);
        assert!(needs_screenshot.expand_args(&record, &output).is_none());
    }

    #[test]
    fn test_missing_media_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let record = GameRecord::new("nes", "smb", "");
        let generator = CommandGenerator::new("does-not-exist", vec!["{covers}".into()]);
        assert!(!generator.generate(&record, &dir.path().join("x.png")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let record = record_with_cover(dir.path());
        let output = dir.path().join("mix").join("smb.png");

        let copy = CommandGenerator::new("cp", vec!["{covers}".into(), "{output}".into()]);
        assert!(copy.generate(&record, &output).unwrap());
        assert_eq!(std::fs::read(&output).unwrap(), b"png");

        let failing = CommandGenerator::new("false", vec!["{covers}".into()]);
        assert!(matches!(
            failing.generate(&record, &dir.path().join("y.png")),
            Err(ArtworkError::Render(_))
        ));
    }
}
