//! Dockhand CI - container build, test and publish
//!
//! Provides the delivery pipeline that:
//! - Assembles cache-accelerated Node environments from source snapshots
//! - Runs unit tests and builds a static-serving image
//! - Publishes the image under a randomized tag, only after tests pass
//! - Backs the engine interface with the Docker CLI

pub mod docker;
pub mod environment;
pub mod gate;
pub mod pipeline;
pub mod stage;
pub mod tag;

// Re-export key types
pub use docker::DockerEngine;
pub use environment::{EnvironmentBuilder, ExecutionEnvironment};
pub use gate::{GateVerdict, ValidationGate};
pub use pipeline::Pipeline;
pub use stage::{BuiltinStage, StageConfig};
pub use tag::{generate_tag, next_address, render_address};
