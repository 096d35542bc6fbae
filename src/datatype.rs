// used for persistence
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
// used for the wire encoding
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// used when parsing an Id from a path segment or query parameter
use std::str::FromStr;
// used to print out the canonical form of an identifier
use std::fmt;

use crate::error::{CodingError, Result};

// ------------- Id -------------
/// Identifies a persisted resource. `Id(0)` is reserved and never addressable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub u64);

impl Id {
    pub const SENTINEL: Id = Id(0);

    /// Parses a non-negative base-10 integer. Signs, whitespace and any
    /// non-digit character are rejected, which `u64::from_str` alone would not do
    /// for a leading `+`.
    pub fn parse(s: &str) -> Result<Id> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CodingError::Parse {
                message: format!("'{s}' is not a base-10 identifier"),
            });
        }
        s.parse::<u64>().map(Id).map_err(|e| CodingError::Parse {
            message: format!("'{s}' is not a valid identifier: {e}"),
        })
    }
    pub fn is_sentinel(&self) -> bool {
        self.0 == 0
    }
    pub fn value(&self) -> u64 {
        self.0
    }
}
impl FromStr for Id {
    type Err = CodingError;
    fn from_str(s: &str) -> Result<Id> {
        Id::parse(s)
    }
}
impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl From<u64> for Id {
    fn from(id: u64) -> Self {
        Id(id)
    }
}
impl ToSql for Id {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let id = i64::try_from(self.0)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(id))
    }
}
impl FromSql for Id {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let id = value.as_i64()?;
        u64::try_from(id).map(Id).map_err(|_| FromSqlError::OutOfRange(id))
    }
}

// ------------- OptionalId -------------
/// A nullable reference to another resource. Whether it is set is carried by
/// the option, so `OptionalId::some(Id(0))` and `OptionalId::none()` differ.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionalId(Option<Id>);

impl OptionalId {
    pub fn some(id: Id) -> Self {
        Self(Some(id))
    }
    pub fn none() -> Self {
        Self(None)
    }
    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }
    pub fn get(&self) -> Option<Id> {
        self.0
    }
}
impl From<Option<Id>> for OptionalId {
    fn from(id: Option<Id>) -> Self {
        Self(id)
    }
}
impl ToSql for OptionalId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match &self.0 {
            Some(id) => id.to_sql(),
            None => Ok(ToSqlOutput::Owned(Value::Null)),
        }
    }
}
impl FromSql for OptionalId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Self(None)),
            other => Id::column_result(other).map(|id| Self(Some(id))),
        }
    }
}
impl fmt::Display for OptionalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "null"),
        }
    }
}

// ------------- Relation -------------
/// A reference from one resource to others as it appears on the wire. The
/// variant records whether the relation was provided at all: `Unset` is
/// `null` (or absent), `ToOne` a single identifier, `ToMany` an array.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Relation {
    #[default]
    Unset,
    ToOne(Id),
    ToMany(Vec<Id>),
}

impl Relation {
    pub fn is_set(&self) -> bool {
        !matches!(self, Relation::Unset)
    }
    /// The referenced identifiers, whatever the arity.
    pub fn ids(&self) -> Vec<Id> {
        match self {
            Relation::Unset => Vec::new(),
            Relation::ToOne(id) => vec![*id],
            Relation::ToMany(ids) => ids.clone(),
        }
    }
}
impl Serialize for Relation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Relation::Unset => serializer.serialize_none(),
            Relation::ToOne(id) => id.serialize(serializer),
            Relation::ToMany(ids) => ids.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelationShape {
    Many(Vec<Id>),
    One(Id),
}

impl<'de> Deserialize<'de> for Relation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match Option::<RelationShape>::deserialize(deserializer)? {
            None => Relation::Unset,
            Some(RelationShape::One(id)) => Relation::ToOne(id),
            Some(RelationShape::Many(ids)) => Relation::ToMany(ids),
        })
    }
}

/// Decodes a JSON array of identifiers, as produced by `json_group_array`.
/// SQL NULL (no aggregate at all) reads as an empty list.
pub fn id_array(json: Option<&str>) -> Result<Vec<Id>> {
    match json {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(Vec::new()),
    }
}
