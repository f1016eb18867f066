// Automation engine - triggers, action chains, durable execution

pub mod actions;
pub mod dispatcher;
pub mod executor;
pub mod model;
pub mod registry;
pub mod store;
pub mod triggers;
pub mod validate;
pub mod variables;

pub use actions::{ActionRunner, Collaborators, PgCollaborators};
pub use dispatcher::TriggerDispatcher;
pub use executor::{EngineError, WorkflowExecutor};
pub use model::{
    AutomationDefinition, Continuation, Execution, ExecutionStatus, RunMode, Step, StepResult,
    StepStatus,
};
pub use registry::ActionKind;
pub use store::{AutomationRepo, PgAutomationRepo, RepoError};
pub use triggers::{DomainEvent, TriggerKind};
pub use variables::RuntimeContext;
