//! The stage pipeline: the fixed stage table and the executor that walks it.

pub mod engine;
pub mod registry;
pub mod stages;

pub use engine::{PipelineError, PipelineExecutor, PipelineOutcome, UpdatePolicy};
pub use registry::{RegistryError, StageRegistry};
pub use stages::{
    AbilityBinding, BindingSpec, DispatchCondition, ExecutionMode, StageDefinition, StageName,
    StageSpec,
};
