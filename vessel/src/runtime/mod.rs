/// Runtime builder for constructing container runtimes.
pub mod builder;
/// Container registry, polling tasks and shutdown signaling.
pub mod supervisor;

pub use builder::ContainerRuntimeBuilder;
pub use supervisor::{ContainerRuntime, ShutdownToken};
