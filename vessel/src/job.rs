use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Identifier of a job as known to the control plane.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier the cluster assigned to one submission of a job.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Everything needed to build and submit one job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobIdentity {
    /// Control-plane identifier of the job.
    pub job_id: JobId,
    /// Opaque flow/config payload handed to the build function.
    pub flow: serde_json::Value,
    /// Working directory of the job; relative dependencies resolve against it.
    pub work_dir: PathBuf,
    /// Additional artifacts the job needs at runtime.
    pub dependencies: Vec<PathBuf>,
}

impl JobIdentity {
    pub fn new(
        job_id: impl Into<JobId>,
        flow: serde_json::Value,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            flow,
            work_dir: work_dir.into(),
            dependencies: Vec::new(),
        }
    }

    /// Add one runtime dependency.
    pub fn with_dependency(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(path.into());
        self
    }

    /// Add several runtime dependencies.
    pub fn with_dependencies<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.dependencies.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Dependencies resolved against the working directory into absolute
    /// paths, keeping only those that exist as regular files.
    ///
    /// A relative working directory is taken relative to the current
    /// directory of this process.
    pub fn resolved_dependencies(&self) -> Vec<PathBuf> {
        self.dependencies
            .iter()
            .filter_map(|dependency| {
                let resolved = match resolve_against(&self.work_dir, dependency) {
                    Ok(path) => path,
                    Err(err) => {
                        tracing::warn!(
                            job_id = %self.job_id,
                            dependency = %dependency.display(),
                            error = %err,
                            "skipping dependency that cannot be resolved"
                        );
                        return None;
                    }
                };
                if resolved.is_file() {
                    Some(resolved)
                } else {
                    tracing::warn!(
                        job_id = %self.job_id,
                        dependency = %dependency.display(),
                        "skipping dependency that is not a regular file"
                    );
                    None
                }
            })
            .collect()
    }
}

fn resolve_against(base: &Path, path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        std::path::absolute(base.join(path))
    }
}

/// Output of a job build: what gets submitted to the cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobArtifact {
    pub job_id: JobId,
    /// Hex SHA-256 of the canonical flow JSON.
    pub flow_digest: String,
    pub dependencies: Vec<PathBuf>,
    pub flow: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_display_and_serialize_transparently() {
        let job = JobId::from("job_a");
        let run = RunId::new("app_001");
        assert_eq!(job.to_string(), "job_a");
        assert_eq!(serde_json::to_string(&run).unwrap(), "\"app_001\"");
    }

    #[test]
    fn test_resolved_dependencies_skip_missing_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.jar"), b"jar").unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();

        let identity = JobIdentity::new("job_a", json!({}), dir.path())
            .with_dependency("plugin.jar")
            .with_dependency("lib")
            .with_dependency("missing.jar");

        let resolved = identity.resolved_dependencies();
        assert_eq!(resolved, vec![dir.path().join("plugin.jar")]);
    }

    #[test]
    fn test_resolved_dependencies_are_absolute_for_relative_work_dir() {
        let dir = tempfile::tempdir_in(".").unwrap();
        std::fs::write(dir.path().join("udf.jar"), b"jar").unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap());

        let identity = JobIdentity::new("job_a", json!({}), &relative).with_dependency("udf.jar");

        let resolved = identity.resolved_dependencies();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].is_absolute());
        assert_eq!(
            resolved[0],
            std::env::current_dir().unwrap().join(&relative).join("udf.jar")
        );
    }
}
