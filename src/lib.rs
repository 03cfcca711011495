pub mod config;
pub mod error;
pub mod hooks;
pub mod host;
pub mod log;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod spawner;
pub mod store;
pub mod tag;
pub mod tracker;
pub mod util;

pub use error::{Error, Result};
pub use model::{ProjectSpec, ResourceSpec};
pub use orchestrator::{Orchestrator, StartOptions};
pub use report::{LifecycleState, OperationSummary, Outcome, Warning};
pub use store::{ProjectState, StateStore};
