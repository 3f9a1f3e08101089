//! Run log destinations under `<log_dir>/history/`.
//!
//! Every run owns three channels: `analysis` (run lifecycle and step
//! announcements), `process` (plugin diagnostics) and `status` (step
//! failures). Lines always go to `tracing`; when a log directory is given
//! they are also appended to one file per channel.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde_json::json;
use tracing::{error, info, warn};

use crate::core::parameters::Parameters;

/// Timestamp format of `analysis_start_time` and history directories.
pub const START_TIME_FORMAT: &str = "%Y-%m-%d_%H.%M.%S%.6f_UTC";

/// Identity of one top-level run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub analysis: String,
    pub started_at: DateTime<Utc>,
    /// `started_at` rendered with [`START_TIME_FORMAT`].
    pub start_time: String,
    pub run_id: String,
}

impl RunIdentity {
    pub fn new(analysis: &str) -> Self {
        Self::at(analysis, Utc::now(), generate_run_id())
    }

    pub fn at(analysis: &str, started_at: DateTime<Utc>, run_id: String) -> Self {
        Self {
            analysis: analysis.to_string(),
            started_at,
            start_time: started_at.format(START_TIME_FORMAT).to_string(),
            run_id,
        }
    }

    /// Overriding parameters handed to every step of the run.
    pub fn parameters(&self) -> Parameters {
        Parameters::from([
            ("analysis_start_time".to_string(), json!(self.start_time)),
            ("run_id".to_string(), json!(self.run_id)),
        ])
    }
}

fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Analysis,
    Process,
    Status,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Analysis => "analysis",
            Channel::Process => "process",
            Channel::Status => "status",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogPaths {
    pub dir: PathBuf,
    pub analysis_log: PathBuf,
    pub process_log: PathBuf,
    pub status_log: PathBuf,
}

impl RunLogPaths {
    pub fn new(log_dir: &Path, identity: &RunIdentity) -> Self {
        let dir = log_dir
            .join("history")
            .join(&identity.start_time)
            .join(&identity.analysis);
        Self {
            analysis_log: dir.join("analysis.log"),
            process_log: dir.join("process.log"),
            status_log: dir.join("status.log"),
            dir,
        }
    }

    pub fn channel(&self, channel: Channel) -> &Path {
        match channel {
            Channel::Analysis => &self.analysis_log,
            Channel::Process => &self.process_log,
            Channel::Status => &self.status_log,
        }
    }
}

/// One log channel.
#[derive(Debug)]
pub struct Logger {
    channel: Channel,
    file: Option<File>,
}

impl Logger {
    pub fn console(channel: Channel) -> Self {
        Self {
            channel,
            file: None,
        }
    }

    /// Append to `path` in addition to `tracing`, creating the file if needed.
    pub fn to_file(channel: Channel, path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {} log {}", channel, path.display()))?;
        Ok(Self {
            channel,
            file: Some(file),
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(channel = self.channel.as_str(), "{message}");
        self.append("INFO", message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(channel = self.channel.as_str(), "{message}");
        self.append("WARN", message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(channel = self.channel.as_str(), "{message}");
        self.append("ERROR", message);
    }

    fn append(&self, level: &str, message: &str) {
        let Some(mut file) = self.file.as_ref() else {
            return;
        };
        let line = format!(
            "{} {level} {message}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
        );
        // Append failures are traced, never propagated.
        if let Err(err) = file.write_all(line.as_bytes()) {
            warn!(channel = self.channel.as_str(), error = %err, "failed to append log line");
        }
    }
}

/// The three channels passed down the call chain.
#[derive(Debug)]
pub struct Loggers {
    pub analysis: Logger,
    pub process: Logger,
    pub status: Logger,
}

impl Loggers {
    /// Channels that only emit `tracing` events.
    pub fn console() -> Self {
        Self {
            analysis: Logger::console(Channel::Analysis),
            process: Logger::console(Channel::Process),
            status: Logger::console(Channel::Status),
        }
    }

    /// Open the channels of a run, backed by files when `log_dir` is given.
    pub fn open(log_dir: Option<&Path>, identity: &RunIdentity) -> Result<Self> {
        let Some(log_dir) = log_dir else {
            return Ok(Self::console());
        };
        let paths = RunLogPaths::new(log_dir, identity);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create log dir {}", paths.dir.display()))?;
        Ok(Self {
            analysis: Logger::to_file(Channel::Analysis, paths.channel(Channel::Analysis))?,
            process: Logger::to_file(Channel::Process, paths.channel(Channel::Process))?,
            status: Logger::to_file(Channel::Status, paths.channel(Channel::Status))?,
        })
    }
}

impl Default for Loggers {
    fn default() -> Self {
        Self::console()
    }
}
