use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::LaunchError;
use crate::launcher::console::{ConsoleSink, TracingConsole};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Memory bound handed to a worker as a launch flag, e.g. `512m`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HeapSize(u64);

impl HeapSize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn from_mebibytes(mebibytes: u64) -> Self {
        Self(mebibytes * MIB)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("invalid heap size {0:?}: expected a positive number with an optional k/m/g suffix")]
pub struct HeapSizeError(String);

impl FromStr for HeapSize {
    type Err = HeapSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (digits, unit) = match trimmed.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&trimmed[..idx], Some(c)),
            _ => (trimmed, None),
        };
        let multiplier = match unit.map(|c| c.to_ascii_lowercase()) {
            None => 1,
            Some('k') => KIB,
            Some('m') => MIB,
            Some('g') => GIB,
            Some(_) => return Err(HeapSizeError(s.to_string())),
        };
        let value: u64 = digits.parse().map_err(|_| HeapSizeError(s.to_string()))?;
        match value.checked_mul(multiplier) {
            Some(bytes) if bytes > 0 => Ok(Self(bytes)),
            _ => Err(HeapSizeError(s.to_string())),
        }
    }
}

impl fmt::Display for HeapSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            b if b % GIB == 0 => write!(f, "{}g", b / GIB),
            b if b % MIB == 0 => write!(f, "{}m", b / MIB),
            b if b % KIB == 0 => write!(f, "{}k", b / KIB),
            b => write!(f, "{b}"),
        }
    }
}

impl TryFrom<String> for HeapSize {
    type Error = HeapSizeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HeapSize> for String {
    fn from(value: HeapSize) -> Self {
        value.to_string()
    }
}

/// A chain of dependency scopes, each with its own entries and an optional
/// parent scope. Walking the chain yields a scope's entries before its
/// parent's, all the way up.
#[derive(Clone, Debug, Default)]
pub struct ClasspathChain {
    entries: Vec<PathBuf>,
    parent: Option<Box<ClasspathChain>>,
}

impl ClasspathChain {
    pub fn new<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: ClasspathChain) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn parent(&self) -> Option<&ClasspathChain> {
        self.parent.as_deref()
    }

    /// Entries of every scope, nearest scope first.
    pub fn walk(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut scope = Some(self);
        while let Some(current) = scope {
            out.extend(current.entries.iter().cloned());
            scope = current.parent();
        }
        out
    }
}

/// Keep the first occurrence of every entry, preserving order.
pub(crate) fn dedup_entries<I>(entries: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

/// Immutable description of one worker launch.
///
/// Built with [`LaunchConfiguration::builder`] and consumed by exactly one
/// call to [`WorkerLauncher::launch`](crate::launcher::WorkerLauncher::launch).
pub struct LaunchConfiguration<W> {
    work: W,
    heap_initial: Option<HeapSize>,
    heap_max: Option<HeapSize>,
    user_classpath: Vec<PathBuf>,
    parent_classpath: Vec<PathBuf>,
    inherit_parent_classpath: bool,
    extra_flags: Vec<String>,
    work_dir: Option<PathBuf>,
    console: Arc<dyn ConsoleSink>,
}

impl<W> fmt::Debug for LaunchConfiguration<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchConfiguration")
            .field("work_type", &std::any::type_name::<W>())
            .field("heap_initial", &self.heap_initial)
            .field("heap_max", &self.heap_max)
            .field("user_classpath", &self.user_classpath)
            .field("parent_classpath", &self.parent_classpath)
            .field("inherit_parent_classpath", &self.inherit_parent_classpath)
            .field("extra_flags", &self.extra_flags)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl<W> LaunchConfiguration<W> {
    pub fn builder() -> LaunchConfigurationBuilder<W> {
        LaunchConfigurationBuilder::new()
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    pub fn heap_initial(&self) -> Option<HeapSize> {
        self.heap_initial
    }

    pub fn heap_max(&self) -> Option<HeapSize> {
        self.heap_max
    }

    pub fn user_classpath(&self) -> &[PathBuf] {
        &self.user_classpath
    }

    pub fn inherits_parent_classpath(&self) -> bool {
        self.inherit_parent_classpath
    }

    /// The classpath the worker will see.
    ///
    /// With an inherited parent classpath the parent's entries come first;
    /// otherwise user entries come first and the parent's are appended
    /// behind them. The first occurrence of a duplicate wins.
    pub fn resolved_classpath(&self) -> Vec<PathBuf> {
        let (front, back) = if self.inherit_parent_classpath {
            (&self.parent_classpath, &self.user_classpath)
        } else {
            (&self.user_classpath, &self.parent_classpath)
        };
        dedup_entries(front.iter().chain(back.iter()).cloned())
    }

    pub fn extra_flags(&self) -> &[String] {
        &self.extra_flags
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    pub fn console(&self) -> Arc<dyn ConsoleSink> {
        Arc::clone(&self.console)
    }
}

/// Fluent builder for [`LaunchConfiguration`].
pub struct LaunchConfigurationBuilder<W> {
    work: Option<W>,
    heap_initial: Option<HeapSize>,
    heap_max: Option<HeapSize>,
    user_classpath: Vec<PathBuf>,
    parent_classpath: Vec<PathBuf>,
    inherit_parent_classpath: bool,
    extra_flags: Vec<String>,
    work_dir: Option<PathBuf>,
    console: Option<Arc<dyn ConsoleSink>>,
}

impl<W> fmt::Debug for LaunchConfigurationBuilder<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchConfigurationBuilder")
            .field("work_set", &self.work.is_some())
            .field("heap_initial", &self.heap_initial)
            .field("heap_max", &self.heap_max)
            .field("user_classpath", &self.user_classpath)
            .field("parent_classpath", &self.parent_classpath)
            .field("inherit_parent_classpath", &self.inherit_parent_classpath)
            .field("console_set", &self.console.is_some())
            .finish()
    }
}

impl<W> Default for LaunchConfigurationBuilder<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> LaunchConfigurationBuilder<W> {
    pub fn new() -> Self {
        Self {
            work: None,
            heap_initial: None,
            heap_max: None,
            user_classpath: Vec::new(),
            parent_classpath: Vec::new(),
            inherit_parent_classpath: true,
            extra_flags: Vec::new(),
            work_dir: None,
            console: None,
        }
    }

    /// Set the work unit to execute.
    pub fn with_work(mut self, work: W) -> Self {
        self.work = Some(work);
        self
    }

    /// Set the sink that receives the worker's console lines.
    pub fn with_console(mut self, console: impl ConsoleSink + 'static) -> Self {
        self.console = Some(Arc::new(console));
        self
    }

    /// Set a shared console sink.
    pub fn with_shared_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_heap_initial(mut self, size: HeapSize) -> Self {
        self.heap_initial = Some(size);
        self
    }

    pub fn with_heap_max(mut self, size: HeapSize) -> Self {
        self.heap_max = Some(size);
        self
    }

    /// Add one user classpath entry.
    pub fn add_classpath_entry(mut self, entry: impl Into<PathBuf>) -> Self {
        self.user_classpath.push(entry.into());
        self
    }

    /// Add user-supplied dependency artifacts.
    pub fn add_user_jars<I, P>(mut self, jars: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.user_classpath.extend(jars.into_iter().map(Into::into));
        self
    }

    /// Add every entry visible through a classpath chain, nearest scope first.
    pub fn add_classpath_chain(mut self, chain: &ClasspathChain) -> Self {
        self.user_classpath.extend(chain.walk());
        self
    }

    /// Declare the dependency roots of the launching process.
    pub fn with_parent_classpath<I, P>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.parent_classpath = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Put user entries ahead of the parent's classpath so they win on
    /// conflict.
    pub fn not_dep_this_process_classpath(mut self) -> Self {
        self.inherit_parent_classpath = false;
        self
    }

    /// Pass an extra runtime flag through to the worker.
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.extra_flags.push(flag.into());
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Configuration`] if no work unit was supplied or
    /// the initial heap exceeds the maximum heap.
    pub fn build(self) -> Result<LaunchConfiguration<W>, LaunchError> {
        let work = self
            .work
            .ok_or_else(|| LaunchError::Configuration("work unit missing".into()))?;

        if let (Some(initial), Some(max)) = (self.heap_initial, self.heap_max) {
            if initial > max {
                return Err(LaunchError::Configuration(format!(
                    "initial heap {initial} exceeds max heap {max}"
                )));
            }
        }

        Ok(LaunchConfiguration {
            work,
            heap_initial: self.heap_initial,
            heap_max: self.heap_max,
            user_classpath: dedup_entries(self.user_classpath),
            parent_classpath: dedup_entries(self.parent_classpath),
            inherit_parent_classpath: self.inherit_parent_classpath,
            extra_flags: self.extra_flags,
            work_dir: self.work_dir,
            console: self
                .console
                .unwrap_or_else(|| Arc::new(TracingConsole)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<PathBuf> {
        items.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_heap_size_parse_and_display() {
        let size: HeapSize = "512m".parse().unwrap();
        assert_eq!(size.bytes(), 512 * 1024 * 1024);
        assert_eq!(size.to_string(), "512m");
        assert_eq!("2G".parse::<HeapSize>().unwrap().to_string(), "2g");
        assert_eq!("1536k".parse::<HeapSize>().unwrap().to_string(), "1536k");
        assert_eq!("1000".parse::<HeapSize>().unwrap().bytes(), 1000);
    }

    #[test]
    fn test_heap_size_rejects_garbage() {
        for bad in ["", "m", "12x", "0m", "-5m", "1.5g"] {
            assert!(bad.parse::<HeapSize>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_heap_size_serde_as_string() {
        let size = HeapSize::from_mebibytes(256);
        assert_eq!(serde_json::to_string(&size).unwrap(), "\"256m\"");
        let back: HeapSize = serde_json::from_str("\"256m\"").unwrap();
        assert_eq!(back, size);
    }

    #[test]
    fn test_build_without_work_unit_fails() {
        let err = LaunchConfiguration::<()>::builder().build().unwrap_err();
        assert!(matches!(err, LaunchError::Configuration(_)));
    }

    #[test]
    fn test_build_rejects_inverted_heap_bounds() {
        let err = LaunchConfiguration::builder()
            .with_work(())
            .with_heap_initial("1g".parse().unwrap())
            .with_heap_max("512m".parse().unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, LaunchError::Configuration(_)));
    }

    #[test]
    fn test_empty_configuration_is_valid() {
        let config = LaunchConfiguration::builder().with_work(()).build().unwrap();
        assert!(config.resolved_classpath().is_empty());
        assert!(config.heap_max().is_none());
        assert!(config.inherits_parent_classpath());
    }

    #[test]
    fn test_classpath_chain_walks_nearest_scope_first() {
        let root = ClasspathChain::new(paths(&["/opt/runtime/lib"]));
        let plugins = ClasspathChain::new(paths(&["/opt/plugins/a.jar", "/opt/plugins/b.jar"]))
            .with_parent(root);
        let job = ClasspathChain::new(paths(&["/jobs/a/udf.jar"])).with_parent(plugins);

        assert_eq!(
            job.walk(),
            paths(&[
                "/jobs/a/udf.jar",
                "/opt/plugins/a.jar",
                "/opt/plugins/b.jar",
                "/opt/runtime/lib",
            ])
        );
    }

    #[test]
    fn test_inherited_classpath_is_prepended_and_deduplicated() {
        let config = LaunchConfiguration::builder()
            .with_work(())
            .with_parent_classpath(paths(&["/opt/runtime/lib", "/opt/shared.jar"]))
            .add_user_jars(paths(&["/jobs/a/udf.jar", "/opt/shared.jar", "/jobs/a/udf.jar"]))
            .build()
            .unwrap();

        assert_eq!(config.user_classpath(), paths(&["/jobs/a/udf.jar", "/opt/shared.jar"]));
        assert_eq!(
            config.resolved_classpath(),
            paths(&["/opt/runtime/lib", "/opt/shared.jar", "/jobs/a/udf.jar"])
        );
    }

    #[test]
    fn test_not_dep_this_process_puts_user_entries_first() {
        let config = LaunchConfiguration::builder()
            .with_work(())
            .with_parent_classpath(paths(&["/opt/runtime/lib", "/opt/shared.jar"]))
            .add_user_jars(paths(&["/opt/shared.jar", "/jobs/a/udf.jar"]))
            .not_dep_this_process_classpath()
            .build()
            .unwrap();

        assert_eq!(
            config.resolved_classpath(),
            paths(&["/opt/shared.jar", "/jobs/a/udf.jar", "/opt/runtime/lib"])
        );
    }
}
