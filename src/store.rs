//! Row-level access to the `tagged_objects` association table.

use rusqlite::{Connection, OptionalExtension, params};

use crate::context::{Clock, UserContext};
use crate::error::TagResult;
use crate::models::{Association, AssociationId, AssociationKey, NewAssociation, ObjectId, TagId, UserId};

/// Reads and writes association rows on a borrowed connection.
///
/// The store validates rows on insert but does not enforce uniqueness;
/// callers that must not create duplicates probe with [`find_one`] or use
/// [`copy_candidates`] first.
///
/// [`find_one`]: AssociationStore::find_one
/// [`copy_candidates`]: AssociationStore::copy_candidates
pub struct AssociationStore<'c> {
    conn: &'c Connection,
}

impl<'c> AssociationStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Validates and inserts a new association.
    ///
    /// `tagger_id` defaults to the acting user and `tagged_on` to the
    /// clock's current time. Nothing is written when validation fails.
    pub fn insert(
        &self,
        new: &NewAssociation,
        clock: &dyn Clock,
        user: &dyn UserContext,
    ) -> TagResult<Association> {
        new.validate()?;

        let tagger_id = new.tagger_id.unwrap_or_else(|| user.current_user());
        let tagged_on = new.tagged_on.unwrap_or_else(|| clock.now());

        self.conn.execute(
            "INSERT INTO tagged_objects (tbl, object_id, tag_id, tagger_id, label, tagged_on)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.scope,
                new.object_id.get(),
                new.tag_id.get(),
                tagger_id.get(),
                new.label,
                tagged_on.unix_timestamp(),
            ],
        )?;

        let id = AssociationId::new(self.conn.last_insert_rowid());
        let association = self
            .get(id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        Ok(association)
    }

    /// Retrieves an association by ID.
    pub fn get(&self, id: AssociationId) -> TagResult<Option<Association>> {
        let sql = format!("SELECT {} FROM tagged_objects WHERE id = ?1", Association::COLUMNS);
        let association = self
            .conn
            .query_row(&sql, [id.get()], Association::from_row)
            .optional()?;
        Ok(association)
    }

    /// Finds the association matching `key`, optionally narrowed to one tagger.
    ///
    /// The label is compared exactly: `None` only matches rows without a
    /// label, and `Some("")` only matches the empty label. When several rows
    /// match, the oldest one is returned.
    pub fn find_one(
        &self,
        key: &AssociationKey,
        tagger: Option<UserId>,
    ) -> TagResult<Option<Association>> {
        let sql = format!(
            "SELECT {} FROM tagged_objects
             WHERE tbl = ?1 AND object_id = ?2 AND tag_id = ?3 AND label IS ?4
               AND (?5 IS NULL OR tagger_id = ?5)
             ORDER BY id
             LIMIT 1",
            Association::COLUMNS
        );
        let association = self
            .conn
            .query_row(
                &sql,
                params![
                    key.scope,
                    key.object_id.get(),
                    key.tag_id.get(),
                    key.label,
                    tagger.map(UserId::get),
                ],
                Association::from_row,
            )
            .optional()?;
        Ok(association)
    }

    /// Lists every association referencing `tag_id`, in scan (ID) order.
    pub fn list_for_tag(&self, tag_id: TagId, scope: Option<&str>) -> TagResult<Vec<Association>> {
        let sql = format!(
            "SELECT {} FROM tagged_objects
             WHERE tag_id = ?1 AND (?2 IS NULL OR tbl = ?2)
             ORDER BY id",
            Association::COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![tag_id.get(), scope], Association::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Lists every association of one object.
    pub fn list_for_object(&self, scope: &str, object_id: ObjectId) -> TagResult<Vec<Association>> {
        let sql = format!(
            "SELECT {} FROM tagged_objects
             WHERE tbl = ?1 AND object_id = ?2
             ORDER BY tag_id, id",
            Association::COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![scope, object_id.get()], Association::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Source rows eligible for copying from `old_tag` onto `new_tag`.
    ///
    /// Anti-join on `(tbl, object_id, label)`: a row qualifies only if the
    /// destination tag has no association with the same key. Rows that
    /// duplicate each other under `old_tag` collapse to the oldest one, so
    /// the copy never produces two rows with one key.
    pub fn copy_candidates(
        &self,
        old_tag: TagId,
        new_tag: TagId,
        scope: Option<&str>,
    ) -> TagResult<Vec<Association>> {
        let sql = format!(
            "SELECT {} FROM tagged_objects
             WHERE id IN (
                 SELECT MIN(src.id) FROM tagged_objects src
                 WHERE src.tag_id = ?1
                   AND (?3 IS NULL OR src.tbl = ?3)
                   AND NOT EXISTS (
                       SELECT 1 FROM tagged_objects dst
                       WHERE dst.tag_id = ?2
                         AND dst.tbl = src.tbl
                         AND dst.object_id = src.object_id
                         AND dst.label IS src.label
                   )
                 GROUP BY src.tbl, src.object_id, src.label
             )
             ORDER BY id",
            Association::COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![old_tag.get(), new_tag.get(), scope], Association::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Points an existing row at another tag, keeping its identity and provenance.
    ///
    /// Returns the number of rows changed (0 if the row vanished).
    pub fn reassign(&self, id: AssociationId, tag_id: TagId) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE tagged_objects SET tag_id = ?1 WHERE id = ?2",
            params![tag_id.get(), id.get()],
        )
    }

    /// Deletes a row. Deleting a missing row is not an error.
    pub fn delete(&self, id: AssociationId) -> rusqlite::Result<usize> {
        self.conn
            .execute("DELETE FROM tagged_objects WHERE id = ?1", [id.get()])
    }

    /// Counts associations per tag, most used first.
    pub fn tag_counts(&self, scope: Option<&str>) -> TagResult<Vec<(TagId, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag_id, COUNT(*) AS uses FROM tagged_objects
             WHERE ?1 IS NULL OR tbl = ?1
             GROUP BY tag_id
             ORDER BY uses DESC, tag_id",
        )?;
        let rows = stmt
            .query_map([scope], |row| {
                Ok((TagId::new(row.get(0)?), row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Counts the associations referencing `tag_id`.
    pub fn count_for_tag(&self, tag_id: TagId) -> TagResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM tagged_objects WHERE tag_id = ?1",
            [tag_id.get()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::context::{ActingUser, FixedClock};
    use time::macros::datetime;

    fn clock() -> FixedClock {
        FixedClock(datetime!(2024-02-03 4:05:06 UTC))
    }

    fn insert(store: &AssociationStore<'_>, new: NewAssociation) -> Association {
        store
            .insert(&new, &clock(), &ActingUser(UserId::new(7)))
            .expect("insert should succeed")
    }

    #[test]
    fn insert_fills_tagger_and_timestamp_defaults() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());

        let association = insert(
            &store,
            NewAssociation::new("resources", ObjectId::new(3), TagId::new(1)),
        );

        assert!(association.id().is_positive());
        assert_eq!(association.tagger_id(), UserId::new(7));
        assert_eq!(association.tagged_on(), datetime!(2024-02-03 4:05:06 UTC));
        assert_eq!(association.label(), None);
    }

    #[test]
    fn insert_keeps_explicit_tagger_and_timestamp() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());

        let association = insert(
            &store,
            NewAssociation::new("tickets", ObjectId::new(3), TagId::new(1))
                .tagger(UserId::new(99))
                .tagged_on(datetime!(2020-01-01 0:00 UTC))
                .label(""),
        );

        assert_eq!(association.tagger_id(), UserId::new(99));
        assert_eq!(association.tagged_on(), datetime!(2020-01-01 0:00 UTC));
        assert_eq!(association.label(), Some(""));
    }

    #[test]
    fn insert_rejects_invalid_rows_without_writing() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());

        let result = store.insert(
            &NewAssociation::new("", ObjectId::new(3), TagId::new(1)),
            &clock(),
            &ActingUser(UserId::new(7)),
        );

        assert!(matches!(result, Err(crate::TagError::Validation(_))));
        assert_eq!(store.count_for_tag(TagId::new(1)).unwrap(), 0);
    }

    #[test]
    fn schema_agrees_with_validation_on_scope() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());

        // Whitespace is a scope like any other
        let spaced = insert(&store, NewAssociation::new("\t", ObjectId::new(3), TagId::new(1)));
        assert_eq!(spaced.scope(), "\t");

        // Bypassing validation, the schema still refuses an empty scope
        let raw = db.connection().execute(
            "INSERT INTO tagged_objects (tbl, object_id, tag_id, tagger_id, tagged_on)
             VALUES ('', 3, 1, 7, 0)",
            [],
        );
        assert!(raw.is_err());
        assert_eq!(store.count_for_tag(TagId::new(1)).unwrap(), 1);
    }

    #[test]
    fn out_of_range_timestamp_is_a_database_error() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());
        db.connection()
            .execute(
                "INSERT INTO tagged_objects (id, tbl, object_id, tag_id, tagger_id, tagged_on)
                 VALUES (1, 'resources', 3, 1, 7, ?1)",
                [i64::MAX],
            )
            .unwrap();

        let result = store.get(AssociationId::new(1));

        assert!(matches!(
            result,
            Err(crate::TagError::Database(rusqlite::Error::FromSqlConversionFailure(6, _, _)))
        ));
    }

    #[test]
    fn find_one_matches_label_exactly() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());
        let labelled = insert(
            &store,
            NewAssociation::new("resources", ObjectId::new(3), TagId::new(1)).label("topic"),
        );

        let bare_key = AssociationKey::new("resources", ObjectId::new(3), TagId::new(1));
        assert_eq!(store.find_one(&bare_key, None).unwrap(), None);

        let found = store
            .find_one(&bare_key.clone().with_label("topic"), None)
            .unwrap();
        assert_eq!(found, Some(labelled));

        let empty = store.find_one(&bare_key.with_label(""), None).unwrap();
        assert_eq!(empty, None);
    }

    #[test]
    fn find_one_filters_by_tagger() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());
        insert(
            &store,
            NewAssociation::new("resources", ObjectId::new(3), TagId::new(1)).tagger(UserId::new(2)),
        );

        let key = AssociationKey::new("resources", ObjectId::new(3), TagId::new(1));
        assert!(store.find_one(&key, Some(UserId::new(2))).unwrap().is_some());
        assert!(store.find_one(&key, Some(UserId::new(3))).unwrap().is_none());
        assert!(store.find_one(&key, None).unwrap().is_some());
    }

    #[test]
    fn copy_candidates_skip_objects_already_tagged() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());
        let (old, new) = (TagId::new(1), TagId::new(2));

        let keep = insert(&store, NewAssociation::new("resources", ObjectId::new(1), old));
        insert(&store, NewAssociation::new("resources", ObjectId::new(2), old));
        insert(&store, NewAssociation::new("resources", ObjectId::new(2), new));
        // Same object id in another scope is a different object
        let other_scope = insert(&store, NewAssociation::new("tickets", ObjectId::new(2), old));

        let candidates = store.copy_candidates(old, new, None).unwrap();
        let ids: Vec<_> = candidates.iter().map(Association::id).collect();
        assert_eq!(ids, vec![keep.id(), other_scope.id()]);

        let tickets_only = store.copy_candidates(old, new, Some("tickets")).unwrap();
        assert_eq!(tickets_only.len(), 1);
        assert_eq!(tickets_only[0].scope(), "tickets");
    }

    #[test]
    fn copy_candidates_collapse_duplicate_sources() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());
        let (old, new) = (TagId::new(1), TagId::new(2));

        let first = insert(&store, NewAssociation::new("resources", ObjectId::new(1), old));
        insert(&store, NewAssociation::new("resources", ObjectId::new(1), old));

        let candidates = store.copy_candidates(old, new, None).unwrap();
        assert_eq!(candidates, vec![first]);
    }

    #[test]
    fn tag_counts_order_by_usage() {
        let db = Database::in_memory().unwrap();
        let store = AssociationStore::new(db.connection());
        for object in 1..=3 {
            insert(&store, NewAssociation::new("resources", ObjectId::new(object), TagId::new(5)));
        }
        insert(&store, NewAssociation::new("tickets", ObjectId::new(1), TagId::new(4)));

        assert_eq!(
            store.tag_counts(None).unwrap(),
            vec![(TagId::new(5), 3), (TagId::new(4), 1)]
        );
        assert_eq!(
            store.tag_counts(Some("tickets")).unwrap(),
            vec![(TagId::new(4), 1)]
        );
    }
}
