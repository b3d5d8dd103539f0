pub mod audit;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod store;

pub use audit::AuditLog;
pub use config::Config;
pub use context::{ActingUser, Clock, ErrorReporter, FixedClock, SystemClock, TracingReporter, UserContext};
pub use db::Database;
pub use error::{TagError, TagResult, ValidationError};
pub use models::{
    Association, AssociationId, AssociationKey, AuditAction, AuditEntry, CopyPayload,
    MoveOutcome, MovePayload, MovedAssociation, NewAssociation, ObjectId, TagId, UserId,
};
pub use service::{AssociationService, CopyReport, MoveReport};
pub use store::AssociationStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_accessible_from_crate_root() {
        let db = Database::in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn service_accessible_from_crate_root() {
        let service = AssociationService::new(Database::in_memory().unwrap())
            .with_user(ActingUser(UserId::new(3)));

        let association = service
            .create(&NewAssociation::new("resources", ObjectId::new(1), TagId::new(1)))
            .unwrap();
        assert_eq!(association.tagger_id(), UserId::new(3));
    }
}
