use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, instrument};

use crate::audit::AuditLog;
use crate::context::{ActingUser, Clock, ErrorReporter, SystemClock, TracingReporter, UserContext};
use crate::error::{TagError, TagResult};
use crate::models::{
    Association, AssociationId, AssociationKey, AuditAction, AuditEntry, CopyPayload,
    MoveOutcome, MovePayload, MovedAssociation, NewAssociation, ObjectId, TagId, UserId,
};
use crate::store::AssociationStore;
use crate::Database;

/// Service layer owning every write to the association table and the audit log.
///
/// Merge and copy run inside a single `BEGIN IMMEDIATE` transaction, so the
/// scan and the writes that depend on it see no interleaved writers. Each row
/// is processed under its own savepoint: a row that fails is rolled back,
/// handed to the [`ErrorReporter`], and the batch continues.
///
/// # Examples
///
/// ```
/// use taglink::{AssociationService, Database, NewAssociation, ObjectId, TagId};
///
/// # fn main() -> anyhow::Result<()> {
/// let service = AssociationService::new(Database::in_memory()?);
///
/// service.tag_object(&NewAssociation::new("resources", ObjectId::new(1), TagId::new(10)))?;
/// let report = service.move_to(Some(TagId::new(10)), Some(TagId::new(20)))?;
///
/// assert_eq!(report.entries.len(), 1);
/// assert!(service.objects_for_tag(TagId::new(10), None)?.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct AssociationService {
    db: Database,
    clock: Box<dyn Clock>,
    user: Box<dyn UserContext>,
    reporter: Box<dyn ErrorReporter>,
}

impl AssociationService {
    /// Creates a service on the system clock, acting as user 1, reporting
    /// skipped rows through `tracing`.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            clock: Box::new(SystemClock),
            user: Box::new(ActingUser(UserId::new(1))),
            reporter: Box::new(TracingReporter),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_user(mut self, user: impl UserContext + 'static) -> Self {
        self.user = Box::new(user);
        self
    }

    pub fn with_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Returns a reference to the underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn store(&self) -> AssociationStore<'_> {
        AssociationStore::new(self.db.connection())
    }

    /// Inserts an association without checking for an existing equivalent.
    pub fn create(&self, new: &NewAssociation) -> TagResult<Association> {
        self.store()
            .insert(new, self.clock.as_ref(), self.user.as_ref())
    }

    /// Tags an object, returning the existing association if the same
    /// `(scope, object, tag, label)` pairing is already present.
    pub fn tag_object(&self, new: &NewAssociation) -> TagResult<Association> {
        new.validate()?;
        self.in_write_transaction(|conn| {
            let store = AssociationStore::new(conn);
            match store.find_one(&new.key(), None)? {
                Some(existing) => Ok(existing),
                None => store.insert(new, self.clock.as_ref(), self.user.as_ref()),
            }
        })
    }

    /// Looks up an association by its dedup key, optionally narrowed to one tagger.
    pub fn find_one(
        &self,
        key: &AssociationKey,
        tagger: Option<UserId>,
    ) -> TagResult<Option<Association>> {
        self.store().find_one(key, tagger)
    }

    pub fn get(&self, id: AssociationId) -> TagResult<Option<Association>> {
        self.store().get(id)
    }

    /// Removes one association. Returns false if it did not exist.
    pub fn untag(&self, id: AssociationId) -> TagResult<bool> {
        Ok(self.store().delete(id)? > 0)
    }

    /// Merges `old_tag` into `new_tag`.
    ///
    /// Every association of `old_tag` is either reassigned to `new_tag` in
    /// place or, when `new_tag` already has an association with the same
    /// `(scope, object, label)`, deleted. One `objects_moved` audit entry is
    /// appended when at least one row was handled.
    ///
    /// Fails without side effects when either tag is missing or not
    /// positive, or when both are the same tag.
    #[instrument(skip(self))]
    pub fn move_to(&self, old_tag: Option<TagId>, new_tag: Option<TagId>) -> TagResult<MoveReport> {
        let (old_tag, new_tag) = require_tag_pair(old_tag, new_tag)?;
        // Every row would be its own duplicate and get deleted
        if old_tag == new_tag {
            return Err(TagError::precondition(format!(
                "cannot merge tag {old_tag} into itself"
            )));
        }
        let now = self.clock.now();
        let acting = self.user.current_user();

        let report = self.in_write_transaction(|conn| {
            let store = AssociationStore::new(conn);
            let mut entries = Vec::new();
            let mut failures = 0;

            for association in store.list_for_tag(old_tag, None)? {
                let id = association.id();
                let handled = with_savepoint(conn, || {
                    let duplicate = store.find_one(&association.key_for(new_tag), None)?;
                    if duplicate.is_some() {
                        store.delete(id)?;
                        Ok(MovedAssociation {
                            association: association.clone(),
                            outcome: MoveOutcome::Removed,
                        })
                    } else {
                        store.reassign(id, new_tag)?;
                        Ok(MovedAssociation {
                            association: association.retagged(new_tag),
                            outcome: MoveOutcome::Moved,
                        })
                    }
                });

                match handled {
                    Ok(entry) => {
                        debug!(association = %id, outcome = ?entry.outcome, "merged association");
                        entries.push(entry);
                    }
                    Err(err) => {
                        failures += 1;
                        self.reporter.report(&row_failure(id, err));
                    }
                }
            }

            let audit_id = if entries.is_empty() {
                None
            } else {
                let payload = MovePayload {
                    old_tag_id: old_tag,
                    new_tag_id: new_tag,
                    entries: entries.clone(),
                };
                Some(AuditLog::new(conn).append(
                    new_tag,
                    AuditAction::ObjectsMoved,
                    &payload,
                    acting,
                    now,
                )?)
            };

            Ok(MoveReport {
                old_tag_id: old_tag,
                new_tag_id: new_tag,
                entries,
                failures,
                audit_id,
            })
        })?;

        info!(
            moved = report.moved_count(),
            removed = report.removed_count(),
            failures = report.failures,
            "merge complete"
        );
        Ok(report)
    }

    /// Copies `old_tag`'s associations onto `new_tag`, optionally only
    /// within `scope`.
    ///
    /// Objects already tagged `new_tag` with the same label are skipped, so
    /// copying a tag onto itself copies nothing.
    /// Copies keep the source row's scope, object, label, tagger and
    /// timestamp but get a fresh ID. One `objects_copied` audit entry is
    /// appended when at least one row was copied.
    #[instrument(skip(self))]
    pub fn copy_to(
        &self,
        old_tag: Option<TagId>,
        new_tag: Option<TagId>,
        scope: Option<&str>,
    ) -> TagResult<CopyReport> {
        let (old_tag, new_tag) = require_tag_pair(old_tag, new_tag)?;
        if scope.is_some_and(str::is_empty) {
            return Err(TagError::precondition("scope filter cannot be empty"));
        }
        let now = self.clock.now();
        let acting = self.user.current_user();

        let report = self.in_write_transaction(|conn| {
            let store = AssociationStore::new(conn);
            let mut copied_ids = Vec::new();
            let mut failures = 0;

            for source in store.copy_candidates(old_tag, new_tag, scope)? {
                let copy = NewAssociation::copy_of(&source, new_tag);
                let inserted = with_savepoint(conn, || {
                    store.insert(&copy, self.clock.as_ref(), self.user.as_ref())
                });

                match inserted {
                    Ok(association) => {
                        debug!(source = %source.id(), copy = %association.id(), "copied association");
                        copied_ids.push(association.id());
                    }
                    Err(err) => {
                        failures += 1;
                        self.reporter.report(&row_failure(source.id(), err));
                    }
                }
            }

            let audit_id = if copied_ids.is_empty() {
                None
            } else {
                let payload = CopyPayload {
                    old_tag_id: old_tag,
                    new_tag_id: new_tag,
                    copied_ids: copied_ids.clone(),
                };
                Some(AuditLog::new(conn).append(
                    new_tag,
                    AuditAction::ObjectsCopied,
                    &payload,
                    acting,
                    now,
                )?)
            };

            Ok(CopyReport {
                old_tag_id: old_tag,
                new_tag_id: new_tag,
                copied_ids,
                failures,
                audit_id,
            })
        })?;

        info!(
            copied = report.copied_ids.len(),
            failures = report.failures,
            "copy complete"
        );
        Ok(report)
    }

    /// Lists the associations of one tag, optionally within one scope.
    pub fn objects_for_tag(&self, tag_id: TagId, scope: Option<&str>) -> TagResult<Vec<Association>> {
        self.store().list_for_tag(tag_id, scope)
    }

    /// Lists the associations of one object.
    pub fn tags_for_object(&self, scope: &str, object_id: ObjectId) -> TagResult<Vec<Association>> {
        self.store().list_for_object(scope, object_id)
    }

    /// Per-tag association counts, most used first.
    pub fn tag_counts(&self, scope: Option<&str>) -> TagResult<Vec<(TagId, i64)>> {
        self.store().tag_counts(scope)
    }

    /// Audit entries in append order, optionally only those attributed to `tag_id`.
    pub fn audit_entries(&self, tag_id: Option<TagId>) -> TagResult<Vec<AuditEntry>> {
        AuditLog::new(self.db.connection()).list(tag_id)
    }

    /// Runs `f` inside a transaction that holds the write lock from the start.
    ///
    /// The transaction rolls back when dropped uncommitted, which covers both
    /// an error from `f` and a failed COMMIT (e.g. `SQLITE_BUSY` while another
    /// connection still reads), so the connection is back in autocommit mode
    /// whenever this returns.
    fn in_write_transaction<T>(&self, f: impl FnOnce(&Connection) -> TagResult<T>) -> TagResult<T> {
        let tx = Transaction::new_unchecked(self.db.connection(), TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Outcome of [`AssociationService::move_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    pub old_tag_id: TagId,
    pub new_tag_id: TagId,
    /// Snapshot of every row handled, in scan order.
    pub entries: Vec<MovedAssociation>,
    /// Rows that failed and were left untouched.
    pub failures: usize,
    /// The appended audit entry, if any row was handled.
    pub audit_id: Option<i64>,
}

impl MoveReport {
    pub fn moved_count(&self) -> usize {
        self.count(MoveOutcome::Moved)
    }

    pub fn removed_count(&self) -> usize {
        self.count(MoveOutcome::Removed)
    }

    fn count(&self, outcome: MoveOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }
}

/// Outcome of [`AssociationService::copy_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub old_tag_id: TagId,
    pub new_tag_id: TagId,
    /// IDs of the newly created rows, in scan order.
    pub copied_ids: Vec<AssociationId>,
    /// Source rows that failed to copy.
    pub failures: usize,
    /// The appended audit entry, if anything was copied.
    pub audit_id: Option<i64>,
}

fn require_tag_pair(old_tag: Option<TagId>, new_tag: Option<TagId>) -> TagResult<(TagId, TagId)> {
    let (Some(old_tag), Some(new_tag)) = (old_tag, new_tag) else {
        return Err(TagError::precondition("both source and destination tags are required"));
    };
    if !old_tag.is_positive() || !new_tag.is_positive() {
        return Err(TagError::precondition(format!(
            "tag ids must be positive, got {old_tag} and {new_tag}"
        )));
    }
    Ok((old_tag, new_tag))
}

/// Runs `f` under a savepoint, undoing its writes if it fails.
fn with_savepoint<T>(conn: &Connection, f: impl FnOnce() -> TagResult<T>) -> TagResult<T> {
    conn.execute_batch("SAVEPOINT association_row")?;
    match f() {
        Ok(value) => {
            conn.execute_batch("RELEASE association_row")?;
            Ok(value)
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK TO association_row; RELEASE association_row")?;
            Err(e)
        }
    }
}

fn row_failure(association: AssociationId, err: TagError) -> TagError {
    match err {
        TagError::Database(source) => TagError::Persistence {
            association,
            source,
        },
        other => other,
    }
}
