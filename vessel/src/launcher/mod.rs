/// Launch configuration, heap sizes and classpath chains.
pub mod config;
/// Console sinks that receive worker output.
pub mod console;
/// Spawning and supervising worker processes.
pub mod process;
/// Payload and result record exchanged with a worker.
pub mod protocol;
/// Typed launch outcomes and failure causes.
pub mod result;

pub use config::{
    ClasspathChain, HeapSize, HeapSizeError, LaunchConfiguration,
    LaunchConfigurationBuilder,
};
pub use console::{ConsoleSink, NullConsole, PrefixedConsole, TracingConsole};
pub use process::{LaunchHandle, WorkerLauncher};
pub use protocol::{ResultRecord, WorkPayload};
pub use result::{ExecutionResult, FailureCause};
