//! Append-only audit log of structural tag operations.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::TagResult;
use crate::models::{AuditAction, AuditEntry, TagId, UserId};

const COLUMNS: &str = "id, tag_id, action, payload, user_id, created_at";

/// Writes and reads `tag_audit_log` rows on a borrowed connection.
///
/// There is no update or delete path; the schema rejects both.
pub struct AuditLog<'c> {
    conn: &'c Connection,
}

impl<'c> AuditLog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Appends one entry and returns its ID.
    pub fn append<P: Serialize>(
        &self,
        tag_id: TagId,
        action: AuditAction,
        payload: &P,
        user_id: UserId,
        at: OffsetDateTime,
    ) -> TagResult<i64> {
        let payload = serde_json::to_string(payload)?;
        self.conn.execute(
            "INSERT INTO tag_audit_log (tag_id, action, payload, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                tag_id.get(),
                action.as_str(),
                payload,
                user_id.get(),
                at.unix_timestamp(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Retrieves one entry by ID.
    pub fn get(&self, id: i64) -> TagResult<Option<AuditEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM tag_audit_log WHERE id = ?1");
        let entry = self.conn.query_row(&sql, [id], entry_from_row).optional()?;
        Ok(entry)
    }

    /// Lists entries in append order, optionally only those attributed to `tag_id`.
    pub fn list(&self, tag_id: Option<TagId>) -> TagResult<Vec<AuditEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM tag_audit_log
             WHERE ?1 IS NULL OR tag_id = ?1
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([tag_id.map(TagId::get)], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action: String = row.get(2)?;
    let action = action.parse::<AuditAction>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
    })?;

    let payload: String = row.get(3)?;
    let payload: serde_json::Value = serde_json::from_str(&payload)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let created_at: i64 = row.get(5)?;
    let created_at = OffsetDateTime::from_unix_timestamp(created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Integer, Box::new(e)))?;

    Ok(AuditEntry::new(
        row.get(0)?,
        TagId::new(row.get(1)?),
        action,
        payload,
        UserId::new(row.get(4)?),
        created_at,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::models::{AssociationId, CopyPayload};
    use time::macros::datetime;

    #[test]
    fn append_then_get_returns_entry() {
        let db = Database::in_memory().unwrap();
        let log = AuditLog::new(db.connection());
        let payload = CopyPayload {
            old_tag_id: TagId::new(1),
            new_tag_id: TagId::new(2),
            copied_ids: vec![AssociationId::new(8)],
        };

        let id = log
            .append(
                TagId::new(2),
                AuditAction::ObjectsCopied,
                &payload,
                UserId::new(3),
                datetime!(2024-06-01 10:00 UTC),
            )
            .unwrap();

        let entry = log.get(id).unwrap().expect("entry should exist");
        assert_eq!(entry.tag_id(), TagId::new(2));
        assert_eq!(entry.action(), AuditAction::ObjectsCopied);
        assert_eq!(entry.user_id(), UserId::new(3));
        assert_eq!(entry.created_at(), datetime!(2024-06-01 10:00 UTC));
        assert_eq!(entry.copy_payload(), Some(payload));
    }

    #[test]
    fn list_filters_by_tag() {
        let db = Database::in_memory().unwrap();
        let log = AuditLog::new(db.connection());
        let at = datetime!(2024-06-01 10:00 UTC);
        let empty = serde_json::json!({});

        log.append(TagId::new(2), AuditAction::ObjectsMoved, &empty, UserId::new(1), at)
            .unwrap();
        log.append(TagId::new(3), AuditAction::ObjectsCopied, &empty, UserId::new(1), at)
            .unwrap();

        assert_eq!(log.list(None).unwrap().len(), 2);
        let for_three = log.list(Some(TagId::new(3))).unwrap();
        assert_eq!(for_three.len(), 1);
        assert_eq!(for_three[0].action(), AuditAction::ObjectsCopied);
    }
}
