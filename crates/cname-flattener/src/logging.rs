// Logging setup: stdout plus a rolling log file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// How often the log file rolls over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
    /// Accepted for existing deployments; rolls daily
    Weekly,
    Never,
}

impl FromStr for Rotation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "minutely" => Ok(Rotation::Minutely),
            "hourly" => Ok(Rotation::Hourly),
            "daily" => Ok(Rotation::Daily),
            "weekly" => Ok(Rotation::Weekly),
            "never" => Ok(Rotation::Never),
            other => anyhow::bail!(
                "LOG_ROTATION_PERIOD '{}' is not valid. \
                Valid periods: minutely, hourly, daily, weekly, never",
                other
            ),
        }
    }
}

impl From<Rotation> for rolling::Rotation {
    fn from(rotation: Rotation) -> Self {
        match rotation {
            Rotation::Minutely => rolling::Rotation::MINUTELY,
            Rotation::Hourly => rolling::Rotation::HOURLY,
            Rotation::Daily | Rotation::Weekly => rolling::Rotation::DAILY,
            Rotation::Never => rolling::Rotation::NEVER,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Log file; rotated files get a date suffix
    pub path: PathBuf,
    pub rotation: Rotation,
    /// Rotated files kept on disk
    pub max_files: usize,
}

impl LogSettings {
    pub fn level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Directory and file name of the log file
    fn split_path(&self) -> Result<(PathBuf, String)> {
        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("LOG_PATH has no file name: {}", self.path.display()))?
            .to_string();
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };
        Ok((directory, file_name))
    }

    fn appender(&self) -> Result<RollingFileAppender> {
        let (directory, file_name) = self.split_path()?;
        RollingFileAppender::builder()
            .rotation(self.rotation.into())
            .filename_prefix(file_name)
            .max_log_files(self.max_files)
            .build(&directory)
            .with_context(|| format!("Failed to open log file in {}", directory.display()))
    }
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// until the process exits.
pub fn init(settings: &LogSettings) -> Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(settings.appender()?);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(LevelFilter::from_level(settings.level()))
        .try_init()
        .context("Failed to set tracing subscriber")?;

    if settings.rotation == Rotation::Weekly {
        tracing::warn!("LOG_ROTATION_PERIOD=weekly is not supported, rotating daily instead");
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(path: &str) -> LogSettings {
        LogSettings {
            level: "info".to_string(),
            path: PathBuf::from(path),
            rotation: Rotation::Daily,
            max_files: 7,
        }
    }

    #[test]
    fn test_rotation_parse() {
        assert_eq!("daily".parse::<Rotation>().unwrap(), Rotation::Daily);
        assert_eq!("HOURLY".parse::<Rotation>().unwrap(), Rotation::Hourly);
        assert_eq!("never".parse::<Rotation>().unwrap(), Rotation::Never);
        assert_eq!("Weekly".parse::<Rotation>().unwrap(), Rotation::Weekly);
        assert!("fortnightly".parse::<Rotation>().is_err());
    }

    #[test]
    fn test_weekly_rolls_daily() {
        assert_eq!(
            rolling::Rotation::from(Rotation::Weekly),
            rolling::Rotation::DAILY
        );
    }

    #[test]
    fn test_split_path() {
        let (dir, file) = settings("cname-flattener.log").split_path().unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(file, "cname-flattener.log");

        let (dir, file) = settings("/var/log/flatten/run.log").split_path().unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/flatten"));
        assert_eq!(file, "run.log");
    }

    #[test]
    fn test_level_mapping() {
        let mut s = settings("x.log");
        assert_eq!(s.level(), Level::INFO);
        s.level = "DEBUG".to_string();
        assert_eq!(s.level(), Level::DEBUG);
    }

    #[test]
    fn test_appender_opens_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flatten.log");
        let s = settings(path.to_str().unwrap());

        assert!(s.appender().is_ok());
    }
}
