use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::launcher::config::HeapSize;
use crate::launcher::protocol::{ResultRecord, WorkPayload, exit_code};
use crate::launcher::result::FailureCause;

/// A self-contained command executed inside a worker process.
///
/// The unit is serialized in the parent, shipped to the worker as its
/// parameters and dispatched there by [`WorkUnit::KIND`]. Anything written
/// to stdout while it runs becomes console output.
pub trait WorkUnit: Serialize + DeserializeOwned + Send + 'static {
    /// Value produced on success.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Registry key; must be unique per worker binary.
    const KIND: &'static str;

    /// Run the unit.
    fn execute(self, ctx: &WorkerContext) -> Result<Self::Output, FailureCause>;
}

/// Launch settings as seen from inside the worker.
#[derive(Clone, Debug, Default)]
pub struct WorkerContext {
    classpath: Vec<PathBuf>,
    heap_initial: Option<HeapSize>,
    heap_max: Option<HeapSize>,
    extra_flags: Vec<String>,
}

impl WorkerContext {
    pub fn new(classpath: Vec<PathBuf>) -> Self {
        Self {
            classpath,
            ..Self::default()
        }
    }

    pub fn classpath(&self) -> &[PathBuf] {
        &self.classpath
    }

    pub fn heap_initial(&self) -> Option<HeapSize> {
        self.heap_initial
    }

    pub fn heap_max(&self) -> Option<HeapSize> {
        self.heap_max
    }

    pub fn extra_flags(&self) -> &[String] {
        &self.extra_flags
    }

    /// Look `name` up on the classpath, first match wins.
    ///
    /// Directory entries match files beneath them; file entries match by
    /// their own file name.
    pub fn find_on_classpath(&self, name: &Path) -> Option<PathBuf> {
        self.classpath.iter().find_map(|entry| {
            if entry.is_dir() {
                let candidate = entry.join(name);
                candidate.is_file().then_some(candidate)
            } else if entry.file_name() == Some(name.as_os_str()) {
                Some(entry.clone())
            } else {
                None
            }
        })
    }
}

type HandlerResult = anyhow::Result<Result<serde_json::Value, FailureCause>>;
type Handler =
    Box<dyn Fn(serde_json::Value, &WorkerContext) -> HandlerResult + Send + Sync>;

/// Work kinds a worker binary knows how to execute.
#[derive(Default)]
pub struct WorkRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl fmt::Debug for WorkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl WorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `W` under its kind. A later registration of the same kind
    /// replaces the earlier one.
    pub fn register<W: WorkUnit>(&mut self) -> &mut Self {
        let handler: Handler = Box::new(|params, ctx| {
            let unit: W = serde_json::from_value(params)
                .with_context(|| format!("decoding {} parameters", W::KIND))?;
            match unit.execute(ctx) {
                Ok(output) => {
                    let value = serde_json::to_value(output)
                        .with_context(|| format!("encoding {} output", W::KIND))?;
                    Ok(Ok(value))
                }
                Err(cause) => Ok(Err(cause)),
            }
        });
        if self.handlers.insert(W::KIND, handler).is_some() {
            tracing::warn!(kind = W::KIND, "work kind registered twice");
        }
        self
    }

    pub fn with<W: WorkUnit>(mut self) -> Self {
        self.register::<W>();
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    fn dispatch(
        &self,
        payload: WorkPayload,
        ctx: &WorkerContext,
    ) -> HandlerResult {
        let handler = self
            .handlers
            .get(payload.kind.as_str())
            .ok_or_else(|| anyhow::anyhow!("unknown work kind {:?}", payload.kind))?;
        handler(payload.params, ctx)
    }
}

/// Arguments accepted by the worker bootstrap.
#[derive(Debug, Parser)]
#[command(name = "vessel-worker", about = "Executes one vessel work unit")]
pub struct WorkerArgs {
    /// Work payload written by the launcher.
    #[arg(long)]
    pub payload: PathBuf,

    /// Where to write the result record.
    #[arg(long)]
    pub result: PathBuf,

    /// Platform-joined classpath entries. Overrides the payload's list.
    #[arg(long)]
    pub classpath: Option<OsString>,

    #[arg(long)]
    pub heap_initial: Option<HeapSize>,

    #[arg(long)]
    pub heap_max: Option<HeapSize>,

    /// Extra runtime flags, passed through after `--`.
    #[arg(last = true)]
    pub extra: Vec<String>,
}

/// Execute one payload and write its result record. Returns the process
/// exit code.
pub fn run_worker(registry: &WorkRegistry, args: WorkerArgs) -> i32 {
    let payload = match WorkPayload::read_from(&args.payload) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = ?err, "unreadable work payload");
            return exit_code::BAD_PAYLOAD;
        }
    };

    let classpath = match &args.classpath {
        Some(joined) => std::env::split_paths(joined).collect(),
        None => payload.classpath.clone(),
    };
    let ctx = WorkerContext {
        classpath,
        heap_initial: args.heap_initial,
        heap_max: args.heap_max,
        extra_flags: args.extra,
    };

    let kind = payload.kind.clone();
    tracing::debug!(kind = %kind, "executing work unit");
    let record = match registry.dispatch(payload, &ctx) {
        Ok(Ok(value)) => ResultRecord::Success { value },
        Ok(Err(cause)) => ResultRecord::Failure { cause },
        Err(err) => {
            tracing::error!(kind = %kind, error = ?err, "work payload rejected");
            return exit_code::BAD_PAYLOAD;
        }
    };

    if let Err(err) = std::io::stdout().flush() {
        tracing::warn!(error = %err, "flushing console output failed");
    }

    match record.write_atomic(&args.result) {
        Ok(()) => exit_code::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "writing result record failed");
            exit_code::RESULT_WRITE_FAILED
        }
    }
}
