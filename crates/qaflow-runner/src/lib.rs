//! `qaflow-runner` — the pipeline runner.
//!
//! Orchestrates the run lifecycle: each run's step sequence executes on an
//! independent background task, delegating real work to agent collaborators
//! and serializing all state transitions for a run through one state
//! machine. External surfaces are seams, not dependencies: the relational
//! store sits behind [`store::RunStore`], agents behind
//! [`collab::PipelineAgents`], and subscribers pull lifecycle events from a
//! bounded broadcast channel.

pub mod collab;
pub mod events;
pub mod pipeline;
pub mod registry;
pub mod store;

pub use collab::{
    FeedbackCategory, ParseOutput, ParseRequest, PipelineAgents, RegenerationFeedback,
    SubprocessAgents,
};
pub use events::{EventBus, PipelineEvent};
pub use pipeline::{PipelineConfig, PipelineRunner, MAX_REGENERATIONS};
pub use registry::{RegistryGuard, RunRegistry};
pub use store::{MemoryRunStore, RedbRunStore, RunStore};
