//! Files and arguments exchanged between the launcher and a worker.
//!
//! The parent writes one [`WorkPayload`] before spawning the worker and reads
//! one [`ResultRecord`] after it exits. Everything the worker prints to
//! stdout in between is console output.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::LaunchError;
use crate::launcher::config::HeapSize;
use crate::launcher::result::FailureCause;

pub const PAYLOAD_FILE: &str = "work.json";
pub const RESULT_FILE: &str = "result.json";
pub const PROTOCOL_VERSION: u32 = 1;

/// Worker exit codes other than success.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const BAD_ARGUMENTS: i32 = 2;
    pub const BAD_PAYLOAD: i32 = 3;
    pub const RESULT_WRITE_FAILED: i32 = 4;
}

/// Serialized work unit: its registered kind and its parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkPayload {
    pub version: u32,
    pub kind: String,
    pub params: serde_json::Value,
    #[serde(default)]
    pub classpath: Vec<PathBuf>,
}

impl WorkPayload {
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind: kind.into(),
            params,
            classpath: Vec::new(),
        }
    }

    pub fn with_classpath(mut self, classpath: Vec<PathBuf>) -> Self {
        self.classpath = classpath;
        self
    }

    pub fn read_from(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("reading payload {}", path.display()))?;
        let payload: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding payload {}", path.display()))?;
        anyhow::ensure!(
            payload.version == PROTOCOL_VERSION,
            "unsupported payload version {} (expected {PROTOCOL_VERSION})",
            payload.version
        );
        Ok(payload)
    }
}

/// The single terminal record a worker writes before exiting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultRecord {
    Success { value: serde_json::Value },
    Failure { cause: FailureCause },
}

impl ResultRecord {
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(bytes).context("decoding result record")
    }

    /// Write the record so that readers never observe a partial file.
    pub fn write_atomic(&self, path: &Path) -> anyhow::Result<()> {
        let bytes =
            serde_json::to_vec(self).context("encoding result record")?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

/// Command-line arguments for one worker invocation.
pub(crate) fn worker_args(
    payload: &Path,
    result: &Path,
    classpath: &[PathBuf],
    heap_initial: Option<HeapSize>,
    heap_max: Option<HeapSize>,
    extra_flags: &[String],
) -> Result<Vec<OsString>, LaunchError> {
    let mut args: Vec<OsString> = vec![
        "--payload".into(),
        payload.as_os_str().to_owned(),
        "--result".into(),
        result.as_os_str().to_owned(),
    ];

    if !classpath.is_empty() {
        let joined = std::env::join_paths(classpath).map_err(|err| {
            LaunchError::Configuration(format!("classpath entry: {err}"))
        })?;
        args.push("--classpath".into());
        args.push(joined);
    }
    if let Some(size) = heap_initial {
        args.push("--heap-initial".into());
        args.push(size.to_string().into());
    }
    if let Some(size) = heap_max {
        args.push("--heap-max".into());
        args.push(size.to_string().into());
    }
    if !extra_flags.is_empty() {
        args.push("--".into());
        args.extend(extra_flags.iter().map(OsString::from));
    }

    Ok(args)
}
