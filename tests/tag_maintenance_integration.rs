//! Integration tests for tag merge and copy workflows.
//!
//! These tests drive the public API against file-backed databases the way
//! the administrative CLI does.

use std::time::Duration;

use anyhow::Result;
use taglink::{
    ActingUser, AssociationService, AuditAction, Database, NewAssociation, ObjectId, TagError,
    TagId, UserId,
};
use tempfile::tempdir;

fn tag(service: &AssociationService, scope: &str, object: i64, tag_id: i64) -> Result<()> {
    service.create(&NewAssociation::new(scope, ObjectId::new(object), TagId::new(tag_id)))?;
    Ok(())
}

#[test]
fn merge_then_copy_keeps_every_key_unique() -> Result<()> {
    // Arrange: three tags with overlapping objects
    let service = AssociationService::new(Database::in_memory()?);
    tag(&service, "resources", 1, 1)?;
    tag(&service, "resources", 2, 1)?;
    tag(&service, "resources", 2, 2)?;
    tag(&service, "tickets", 2, 3)?;
    tag(&service, "resources", 1, 3)?;

    // Act
    service.move_to(Some(TagId::new(1)), Some(TagId::new(2)))?;
    service.copy_to(Some(TagId::new(2)), Some(TagId::new(3)), None)?;

    // Assert: no (scope, object, tag, label) appears twice
    let duplicates: i64 = service.database().connection().query_row(
        "SELECT COUNT(*) FROM (
             SELECT 1 FROM tagged_objects
             GROUP BY tbl, object_id, tag_id, label
             HAVING COUNT(*) > 1
         )",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(duplicates, 0);

    let tag_three: Vec<_> = service
        .objects_for_tag(TagId::new(3), None)?
        .iter()
        .map(|a| (a.scope().to_string(), a.object_id().get()))
        .collect();
    assert_eq!(tag_three.len(), 3, "resources/1, resources/2, tickets/2");

    let actions: Vec<_> = service
        .audit_entries(None)?
        .iter()
        .map(|e| e.action())
        .collect();
    assert_eq!(actions, vec![AuditAction::ObjectsMoved, AuditAction::ObjectsCopied]);
    Ok(())
}

#[test]
fn merge_waits_for_concurrent_writer_and_fails_cleanly_on_timeout() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tags.db");

    let service = AssociationService::new(Database::open(&path)?)
        .with_user(ActingUser(UserId::new(2)));
    tag(&service, "resources", 1, 1)?;
    service.database().set_busy_timeout(Duration::from_millis(50))?;

    // Another connection holds the write lock
    let other = Database::open(&path)?;
    other.connection().execute_batch("BEGIN IMMEDIATE")?;

    let blocked = service.move_to(Some(TagId::new(1)), Some(TagId::new(2)));
    assert!(matches!(blocked, Err(TagError::Database(_))));
    assert_eq!(service.objects_for_tag(TagId::new(1), None)?.len(), 1);

    other.connection().execute_batch("COMMIT")?;

    let report = service.move_to(Some(TagId::new(1)), Some(TagId::new(2)))?;
    assert_eq!(report.moved_count(), 1);
    assert_eq!(service.audit_entries(Some(TagId::new(2)))?.len(), 1);
    Ok(())
}

#[test]
fn failed_commit_leaves_connection_usable() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tags.db");

    let service = AssociationService::new(Database::open(&path)?);
    tag(&service, "resources", 1, 1)?;
    service.database().set_busy_timeout(Duration::from_millis(50))?;

    // An open read transaction keeps a shared lock, so COMMIT stays busy
    let reader = Database::open(&path)?;
    reader.connection().execute_batch("BEGIN")?;
    let seen: i64 = reader
        .connection()
        .query_row("SELECT COUNT(*) FROM tagged_objects", [], |row| row.get(0))?;
    assert_eq!(seen, 1);

    let blocked = service.move_to(Some(TagId::new(1)), Some(TagId::new(2)));
    assert!(matches!(blocked, Err(TagError::Database(_))));
    assert!(service.database().connection().is_autocommit());
    assert_eq!(service.objects_for_tag(TagId::new(1), None)?.len(), 1);
    assert!(service.audit_entries(None)?.is_empty());

    reader.connection().execute_batch("COMMIT")?;

    let moved = service.move_to(Some(TagId::new(1)), Some(TagId::new(2)))?;
    assert_eq!(moved.moved_count(), 1);
    let copied = service.copy_to(Some(TagId::new(2)), Some(TagId::new(3)), None)?;
    assert_eq!(copied.copied_ids.len(), 1);
    service.tag_object(&NewAssociation::new("resources", ObjectId::new(2), TagId::new(1)))?;

    assert_eq!(service.audit_entries(None)?.len(), 2);
    assert_eq!(service.objects_for_tag(TagId::new(1), None)?.len(), 1);
    Ok(())
}

#[test]
fn operations_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tags.db");

    {
        let service = AssociationService::new(Database::open(&path)?);
        tag(&service, "tickets", 4, 1)?;
        service.copy_to(Some(TagId::new(1)), Some(TagId::new(2)), Some("tickets"))?;
    }

    let service = AssociationService::new(Database::open(&path)?);
    assert_eq!(service.objects_for_tag(TagId::new(2), Some("tickets"))?.len(), 1);

    let entries = service.audit_entries(None)?;
    assert_eq!(entries.len(), 1);
    let payload = entries[0].copy_payload().expect("copy payload should decode");
    assert_eq!(payload.copied_ids.len(), 1);
    Ok(())
}
