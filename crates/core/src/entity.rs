use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every restorable table of the portal.
///
/// Declaration order is the dependency order: each kind appears after every
/// kind it holds a foreign key to. Export and re-insert walk [`EntityKind::ORDER`]
/// forwards; clearing walks it backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Faculties,
    Departments,
    Curricula,
    Users,
    Students,
    Staff,
    Companies,
    CompanyContacts,
    Internships,
    Applications,
    ApplicationReviews,
    Documents,
    PrintRecords,
    AcademicYears,
    Holidays,
    SystemSettings,
}

impl EntityKind {
    pub const ORDER: [EntityKind; 16] = [
        EntityKind::Faculties,
        EntityKind::Departments,
        EntityKind::Curricula,
        EntityKind::Users,
        EntityKind::Students,
        EntityKind::Staff,
        EntityKind::Companies,
        EntityKind::CompanyContacts,
        EntityKind::Internships,
        EntityKind::Applications,
        EntityKind::ApplicationReviews,
        EntityKind::Documents,
        EntityKind::PrintRecords,
        EntityKind::AcademicYears,
        EntityKind::Holidays,
        EntityKind::SystemSettings,
    ];

    /// Parents before children.
    pub fn forward() -> impl Iterator<Item = EntityKind> {
        Self::ORDER.into_iter()
    }

    /// Children before parents.
    pub fn reverse() -> impl Iterator<Item = EntityKind> {
        Self::ORDER.into_iter().rev()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Faculties => "faculties",
            EntityKind::Departments => "departments",
            EntityKind::Curricula => "curricula",
            EntityKind::Users => "users",
            EntityKind::Students => "students",
            EntityKind::Staff => "staff",
            EntityKind::Companies => "companies",
            EntityKind::CompanyContacts => "company_contacts",
            EntityKind::Internships => "internships",
            EntityKind::Applications => "applications",
            EntityKind::ApplicationReviews => "application_reviews",
            EntityKind::Documents => "documents",
            EntityKind::PrintRecords => "print_records",
            EntityKind::AcademicYears => "academic_years",
            EntityKind::Holidays => "holidays",
            EntityKind::SystemSettings => "system_settings",
        }
    }

    /// Foreign-key columns of this kind and the kind each one references.
    pub fn foreign_keys(self) -> &'static [(&'static str, EntityKind)] {
        match self {
            EntityKind::Departments => &[("faculty_id", EntityKind::Faculties)],
            EntityKind::Curricula => &[("department_id", EntityKind::Departments)],
            EntityKind::Students => &[
                ("user_id", EntityKind::Users),
                ("curriculum_id", EntityKind::Curricula),
            ],
            EntityKind::Staff => &[
                ("user_id", EntityKind::Users),
                ("department_id", EntityKind::Departments),
            ],
            EntityKind::CompanyContacts => &[("company_id", EntityKind::Companies)],
            EntityKind::Internships => &[("company_id", EntityKind::Companies)],
            EntityKind::Applications => &[
                ("student_id", EntityKind::Students),
                ("internship_id", EntityKind::Internships),
            ],
            EntityKind::ApplicationReviews => &[
                ("application_id", EntityKind::Applications),
                ("reviewer_id", EntityKind::Staff),
            ],
            EntityKind::Documents => &[("application_id", EntityKind::Applications)],
            EntityKind::PrintRecords => &[
                ("document_id", EntityKind::Documents),
                ("printed_by", EntityKind::Staff),
            ],
            EntityKind::Faculties
            | EntityKind::Users
            | EntityKind::Companies
            | EntityKind::AcademicYears
            | EntityKind::Holidays
            | EntityKind::SystemSettings => &[],
        }
    }

    /// Position in [`EntityKind::ORDER`].
    pub fn rank(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        EntityKind::forward()
            .find(|kind| kind.as_str() == raw)
            .ok_or_else(|| format!("unknown entity kind: {raw}"))
    }
}

/// One column value, tagged so that 64-bit integers, timestamps and binary
/// survive a JSON round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(#[serde(with = "int_string")] i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

/// A single row, keyed by column name. Every entity carries an integer `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(pub BTreeMap<String, FieldValue>);

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.0.get(column)
    }

    pub fn id(&self) -> Option<i64> {
        self.get("id").and_then(FieldValue::as_int)
    }
}

mod int_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(de::Error::custom)
    }
}
