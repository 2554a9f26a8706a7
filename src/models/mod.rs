//! Domain model module declarations.

pub mod agent;
pub mod change;
pub mod commit;
pub mod event;
pub mod message;
pub mod validation;

pub use agent::{ActivityRecord, AgentId, AgentState};
pub use change::{ChangeDescriptor, EditKind, EditOperation, EditSet, Location, Revision};
pub use commit::{CommitRecord, PipelineOutcome};
pub use event::{CoreEvent, EventKind};
pub use message::{Direction, Directive, Message, MessageId, Payload};
pub use validation::ValidationResult;
