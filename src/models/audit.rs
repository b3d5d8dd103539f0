use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{Association, AssociationId, TagId, UserId};

/// Kind of structural change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Associations were reassigned from one tag to another.
    ObjectsMoved,
    /// Associations were duplicated onto another tag.
    ObjectsCopied,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectsMoved => "objects_moved",
            Self::ObjectsCopied => "objects_copied",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "objects_moved" => Ok(Self::ObjectsMoved),
            "objects_copied" => Ok(Self::ObjectsCopied),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// What a merge did with one association of the source tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveOutcome {
    /// The row now points at the destination tag.
    Moved,
    /// The destination already had an equivalent row, so this one was deleted.
    Removed,
}

/// Snapshot of an association as it stood after a merge touched it.
///
/// For `Removed` rows the snapshot holds the last persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedAssociation {
    #[serde(flatten)]
    pub association: Association,
    pub outcome: MoveOutcome,
}

/// Payload of an `objects_moved` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePayload {
    pub old_tag_id: TagId,
    pub new_tag_id: TagId,
    pub entries: Vec<MovedAssociation>,
}

/// Payload of an `objects_copied` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyPayload {
    pub old_tag_id: TagId,
    pub new_tag_id: TagId,
    pub copied_ids: Vec<AssociationId>,
}

/// A persisted, immutable audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    id: i64,
    tag_id: TagId,
    action: AuditAction,
    payload: serde_json::Value,
    user_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl AuditEntry {
    pub(crate) fn new(
        id: i64,
        tag_id: TagId,
        action: AuditAction,
        payload: serde_json::Value,
        user_id: UserId,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            tag_id,
            action,
            payload,
            user_id,
            created_at,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns the tag the change is attributed to (the destination tag).
    pub fn tag_id(&self) -> TagId {
        self.tag_id
    }

    pub fn action(&self) -> AuditAction {
        self.action
    }

    /// Returns the raw JSON payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Decodes the payload of an `objects_moved` entry.
    ///
    /// Returns `None` for other actions.
    pub fn move_payload(&self) -> Option<MovePayload> {
        match self.action {
            AuditAction::ObjectsMoved => serde_json::from_value(self.payload.clone()).ok(),
            AuditAction::ObjectsCopied => None,
        }
    }

    /// Decodes the payload of an `objects_copied` entry.
    ///
    /// Returns `None` for other actions.
    pub fn copy_payload(&self) -> Option<CopyPayload> {
        match self.action {
            AuditAction::ObjectsCopied => serde_json::from_value(self.payload.clone()).ok(),
            AuditAction::ObjectsMoved => None,
        }
    }
}
