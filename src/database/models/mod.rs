pub mod chat;
pub mod execution;
pub mod job;
pub mod message;
pub mod pending_approval;
pub mod state_entry;

pub use chat::{Chat, NewChat};
pub use execution::{ExecutionRecordRow, ExecutionStatus, NewExecutionRecord};
pub use job::{JobRow, JobStatus, NewJob};
pub use message::{MessageRole, MessageRow, NewMessage};
pub use pending_approval::{NewPendingApproval, PendingApprovalRow};
pub use state_entry::{NewStateEntry, StateEntryRow};
