//! Session-scoped persistence: conversations with snapshot isolation,
//! execution plans, pending approvals, and the unit-of-work wrapper that
//! gives long-lived streams explicit commit points.

pub mod approvals;
pub mod conversation;
pub mod plans;
pub mod store;
pub mod uow;

pub use approvals::ApprovalStore;
pub use conversation::{Conversation, ConversationSnapshot};
pub use plans::PlanStore;
pub use store::ConversationStore;
pub use uow::UnitOfWork;
