use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::job::{JobArtifact, JobId, JobIdentity};
use crate::launcher::result::FailureCause;
use crate::worker::{WorkRegistry, WorkUnit, WorkerContext};

/// Registry with every built-in work unit.
pub fn standard_registry() -> WorkRegistry {
    WorkRegistry::new().with::<BuildManifest>().with::<Probe>()
}

/// Builds the artifact submitted to the cluster for one job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildManifest {
    pub job_id: JobId,
    pub flow: serde_json::Value,
    /// Dependency entries; relative entries are looked up on the classpath.
    #[serde(default)]
    pub dependencies: Vec<PathBuf>,
}

impl BuildManifest {
    pub fn for_job(identity: &JobIdentity) -> Self {
        Self {
            job_id: identity.job_id.clone(),
            flow: identity.flow.clone(),
            dependencies: identity.resolved_dependencies(),
        }
    }
}

impl WorkUnit for BuildManifest {
    type Output = JobArtifact;
    const KIND: &'static str = "vessel.build_manifest";

    fn execute(self, ctx: &WorkerContext) -> Result<JobArtifact, FailureCause> {
        println!("building manifest for job {}", self.job_id);

        if !self.flow.is_object() {
            return Err(FailureCause::new(
                "InvalidFlow",
                format!("flow of job {} is not a JSON object", self.job_id),
            ));
        }

        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for dependency in &self.dependencies {
            let resolved = if dependency.is_absolute() {
                dependency.is_file().then(|| dependency.clone())
            } else {
                ctx.find_on_classpath(dependency)
            };
            match resolved {
                Some(path) => {
                    println!("resolved dependency {}", path.display());
                    dependencies.push(path);
                }
                None => {
                    return Err(FailureCause::new(
                        "MissingDependency",
                        format!("dependency {} not found", dependency.display()),
                    ));
                }
            }
        }

        let canonical = serde_json::to_vec(&self.flow).map_err(|err| {
            FailureCause::new("InvalidFlow", "flow could not be encoded")
                .caused_by(err.to_string())
        })?;
        let flow_digest = hex::encode(Sha256::digest(&canonical));
        println!("flow digest {flow_digest}");

        Ok(JobArtifact {
            job_id: self.job_id,
            flow_digest,
            dependencies,
            flow: self.flow,
        })
    }
}

/// Diagnostic work unit for checking a worker deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "probe", rename_all = "snake_case")]
pub enum Probe {
    /// Return `value`.
    Value { value: i64 },
    /// Integer division; division by zero fails with `ArithmeticError`.
    Divide { numerator: i64, denominator: i64 },
    /// Print `lines`, then return how many were printed.
    Echo { lines: Vec<String> },
    /// Print `lines`, then fail with `message`.
    EchoThenFail { lines: Vec<String>, message: String },
    /// Sleep, then return the slept milliseconds.
    Sleep { millis: u64 },
    /// Terminate the worker without writing a result record.
    Exit { code: i32 },
}

impl WorkUnit for Probe {
    type Output = i64;
    const KIND: &'static str = "vessel.probe";

    fn execute(self, _ctx: &WorkerContext) -> Result<i64, FailureCause> {
        match self {
            Probe::Value { value } => Ok(value),
            Probe::Divide {
                numerator,
                denominator,
            } => {
                println!("dividing {numerator} by {denominator}");
                numerator.checked_div(denominator).ok_or_else(|| {
                    let message = if denominator == 0 {
                        "division by zero"
                    } else {
                        "division overflow"
                    };
                    FailureCause::new("ArithmeticError", message)
                })
            }
            Probe::Echo { lines } => {
                for line in &lines {
                    println!("{line}");
                }
                Ok(lines.len() as i64)
            }
            Probe::EchoThenFail { lines, message } => {
                for line in &lines {
                    println!("{line}");
                }
                Err(FailureCause::new("ProbeFailure", message))
            }
            Probe::Sleep { millis } => {
                let slept = i64::try_from(millis).map_err(|_| {
                    FailureCause::new("InvalidArgument", format!("sleep of {millis}ms is out of range"))
                })?;
                thread::sleep(Duration::from_millis(millis));
                Ok(slept)
            }
            Probe::Exit { code } => std::process::exit(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_standard_registry_kinds() {
        assert_eq!(
            standard_registry().kinds(),
            vec!["vessel.build_manifest", "vessel.probe"]
        );
    }

    #[test]
    fn test_probe_wire_format() {
        let probe = Probe::Divide {
            numerator: 1,
            denominator: 0,
        };
        assert_eq!(
            serde_json::to_value(&probe).unwrap(),
            json!({"probe": "divide", "numerator": 1, "denominator": 0})
        );
    }

    #[test]
    fn test_divide_by_zero_is_arithmetic_error() {
        let cause = Probe::Divide {
            numerator: 10,
            denominator: 0,
        }
        .execute(&WorkerContext::default())
        .unwrap_err();
        assert_eq!(cause.to_string(), "ArithmeticError: division by zero");
    }

    #[test]
    fn test_sleep_beyond_i64_is_rejected_before_sleeping() {
        let cause = Probe::Sleep { millis: u64::MAX }
            .execute(&WorkerContext::default())
            .unwrap_err();
        assert_eq!(cause.kind, "InvalidArgument");

        let slept = Probe::Sleep { millis: 1 }
            .execute(&WorkerContext::default())
            .unwrap();
        assert_eq!(slept, 1);
    }

    #[test]
    fn test_build_manifest_digest_is_stable() {
        let unit = BuildManifest {
            job_id: JobId::new("job_a"),
            flow: json!({"source": "kafka", "sink": "hdfs"}),
            dependencies: Vec::new(),
        };
        let first = unit.clone().execute(&WorkerContext::default()).unwrap();
        let second = unit.execute(&WorkerContext::default()).unwrap();
        assert_eq!(first.flow_digest.len(), 64);
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_manifest_rejects_non_object_flow() {
        let cause = BuildManifest {
            job_id: JobId::new("job_a"),
            flow: json!(["not", "an", "object"]),
            dependencies: Vec::new(),
        }
        .execute(&WorkerContext::default())
        .unwrap_err();
        assert_eq!(cause.kind, "InvalidFlow");
    }

    #[test]
    fn test_build_manifest_resolves_dependencies_on_classpath() {
        let lib = tempfile::tempdir().unwrap();
        std::fs::write(lib.path().join("udf.jar"), b"x").unwrap();
        let ctx = WorkerContext::new(vec![lib.path().to_path_buf()]);

        let artifact = BuildManifest {
            job_id: JobId::new("job_a"),
            flow: json!({}),
            dependencies: vec![PathBuf::from("udf.jar")],
        }
        .execute(&ctx)
        .unwrap();
        assert_eq!(artifact.dependencies, vec![lib.path().join("udf.jar")]);

        let cause = BuildManifest {
            job_id: JobId::new("job_a"),
            flow: json!({}),
            dependencies: vec![PathBuf::from("absent.jar")],
        }
        .execute(&ctx)
        .unwrap_err();
        assert_eq!(cause.kind, "MissingDependency");
    }
}
