mod association;
mod audit;
mod ids;

pub use association::{Association, AssociationKey, NewAssociation};
pub use audit::{AuditAction, AuditEntry, CopyPayload, MoveOutcome, MovePayload, MovedAssociation};
pub use ids::{AssociationId, ObjectId, TagId, UserId};
