use rusqlite::Row;
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{AssociationId, ObjectId, TagId, UserId};
use crate::error::ValidationError;

/// A persisted link between a tag and an object in some scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    id: AssociationId,
    scope: String,
    object_id: ObjectId,
    tag_id: TagId,
    tagger_id: UserId,
    label: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    tagged_on: OffsetDateTime,
}

impl Association {
    /// Columns selected by every query that hydrates an `Association`,
    /// in the order `from_row` expects them.
    pub(crate) const COLUMNS: &'static str = "id, tbl, object_id, tag_id, tagger_id, label, tagged_on";

    /// Builds an association from a row selected with [`Association::COLUMNS`].
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tagged_on: i64 = row.get(6)?;
        let tagged_on = OffsetDateTime::from_unix_timestamp(tagged_on)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Integer, Box::new(e)))?;

        Ok(Self {
            id: AssociationId::new(row.get(0)?),
            scope: row.get(1)?,
            object_id: ObjectId::new(row.get(2)?),
            tag_id: TagId::new(row.get(3)?),
            tagger_id: UserId::new(row.get(4)?),
            label: row.get(5)?,
            tagged_on,
        })
    }

    pub fn id(&self) -> AssociationId {
        self.id
    }

    /// Returns the domain/table namespace of the tagged object.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn tag_id(&self) -> TagId {
        self.tag_id
    }

    pub fn tagger_id(&self) -> UserId {
        self.tagger_id
    }

    /// Returns the optional qualifying label. `Some("")` is distinct from `None`.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn tagged_on(&self) -> OffsetDateTime {
        self.tagged_on
    }

    /// Returns the dedup key of this association under a different tag.
    pub fn key_for(&self, tag_id: TagId) -> AssociationKey {
        AssociationKey {
            scope: self.scope.clone(),
            object_id: self.object_id,
            tag_id,
            label: self.label.clone(),
        }
    }

    /// Returns a copy of this association pointing at `tag_id`.
    ///
    /// Only used to build snapshots after an in-place reassignment.
    pub(crate) fn retagged(&self, tag_id: TagId) -> Self {
        Self {
            tag_id,
            ..self.clone()
        }
    }
}

/// Identifies an object-tag pairing independently of row identity.
///
/// Two associations with equal keys are duplicates of each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssociationKey {
    pub scope: String,
    pub object_id: ObjectId,
    pub tag_id: TagId,
    pub label: Option<String>,
}

impl AssociationKey {
    /// Creates an unlabelled key.
    pub fn new(scope: impl Into<String>, object_id: ObjectId, tag_id: TagId) -> Self {
        Self {
            scope: scope.into(),
            object_id,
            tag_id,
            label: None,
        }
    }

    /// Sets the label the key must match exactly.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// An association that has not been persisted yet.
///
/// `tagger_id` and `tagged_on` are filled from the acting user and the
/// clock when left unset.
///
/// # Examples
///
/// ```
/// use taglink::{NewAssociation, ObjectId, TagId};
///
/// let new = NewAssociation::new("tickets", ObjectId::new(4), TagId::new(2)).label("triage");
/// assert!(new.validate().is_ok());
///
/// let bad = NewAssociation::new("", ObjectId::new(4), TagId::new(2));
/// assert!(bad.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssociation {
    pub(crate) scope: String,
    pub(crate) object_id: ObjectId,
    pub(crate) tag_id: TagId,
    pub(crate) tagger_id: Option<UserId>,
    pub(crate) label: Option<String>,
    pub(crate) tagged_on: Option<OffsetDateTime>,
}

impl NewAssociation {
    pub fn new(scope: impl Into<String>, object_id: ObjectId, tag_id: TagId) -> Self {
        Self {
            scope: scope.into(),
            object_id,
            tag_id,
            tagger_id: None,
            label: None,
            tagged_on: None,
        }
    }

    /// Builds a fresh row for `tag_id` carrying over everything else from `source`.
    pub(crate) fn copy_of(source: &Association, tag_id: TagId) -> Self {
        Self {
            scope: source.scope.clone(),
            object_id: source.object_id,
            tag_id,
            tagger_id: Some(source.tagger_id),
            label: source.label.clone(),
            tagged_on: Some(source.tagged_on),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn tagger(mut self, tagger_id: UserId) -> Self {
        self.tagger_id = Some(tagger_id);
        self
    }

    pub fn tagged_on(mut self, tagged_on: OffsetDateTime) -> Self {
        self.tagged_on = Some(tagged_on);
        self
    }

    /// Checks the fields the store requires before anything is written.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scope.is_empty() {
            return Err(ValidationError::EmptyScope);
        }
        if !self.object_id.is_positive() {
            return Err(ValidationError::InvalidObjectId(self.object_id));
        }
        if !self.tag_id.is_positive() {
            return Err(ValidationError::InvalidTagId(self.tag_id));
        }
        Ok(())
    }

    /// Returns the dedup key this association would occupy.
    pub fn key(&self) -> AssociationKey {
        AssociationKey {
            scope: self.scope.clone(),
            object_id: self.object_id,
            tag_id: self.tag_id,
            label: self.label.clone(),
        }
    }
}
