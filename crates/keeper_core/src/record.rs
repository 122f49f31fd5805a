use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Opaque record identifier. Freshly created records get a UUID v4; stored
/// records keep whatever token they were saved with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    #[default]
    Birthday,
    Anniversary,
    Other,
}

impl Category {
    /// Display label used by cards and exports.
    pub fn label(self) -> &'static str {
        match self {
            Category::Birthday => "生日",
            Category::Anniversary => "纪念日",
            Category::Other => "其他",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown category `{0}`; expected birthday|anniversary|other")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "birthday" | "生日" => Ok(Category::Birthday),
            "anniversary" | "纪念日" => Ok(Category::Anniversary),
            "other" | "其他" => Ok(Category::Other),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// A recurring personal date. Field names on the wire follow the stored
/// JSON layout (`name`, `type`, `isLunar`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(rename = "name")]
    pub title: String,
    pub date: NaiveDate,
    #[serde(rename = "type", default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Reserved; nothing reads it.
    #[serde(rename = "isLunar", default, skip_serializing_if = "Option::is_none")]
    pub is_lunar: Option<bool>,
}

impl Record {
    pub fn new(
        id: RecordId,
        title: impl Into<String>,
        date: NaiveDate,
        category: Category,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            date,
            category,
            notes: None,
            is_lunar: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref().filter(|notes| !notes.is_empty())
    }

    pub fn iso_date(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("title cannot be empty")]
    EmptyTitle,
    #[error("date cannot be empty")]
    MissingDate,
    #[error("`{0}` is not a valid YYYY-MM-DD date")]
    InvalidDate(String),
}

/// Unvalidated form input for creating or editing a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordDraft {
    pub title: String,
    pub date: String,
    pub category: Category,
    pub notes: String,
    pub is_lunar: Option<bool>,
}

impl RecordDraft {
    pub fn new(title: impl Into<String>, date: impl Into<String>, category: Category) -> Self {
        Self {
            title: title.into(),
            date: date.into(),
            category,
            ..Self::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Prefills the form from an existing record.
    pub fn from_record(record: &Record) -> Self {
        Self {
            title: record.title.clone(),
            date: record.iso_date(),
            category: record.category,
            notes: record.notes.clone().unwrap_or_default(),
            is_lunar: record.is_lunar,
        }
    }

    pub fn parse_date(&self) -> Result<NaiveDate, DraftError> {
        let raw = self.date.trim();
        if raw.is_empty() {
            return Err(DraftError::MissingDate);
        }
        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|_| DraftError::InvalidDate(raw.to_string()))
    }

    pub fn validate(&self) -> Result<(), DraftError> {
        if self.title.trim().is_empty() {
            return Err(DraftError::EmptyTitle);
        }
        self.parse_date().map(|_| ())
    }

    /// Validates the draft and builds a record carrying `id`.
    pub fn into_record(self, id: RecordId) -> Result<Record, DraftError> {
        self.validate()?;
        let date = self.parse_date()?;
        let notes = Some(self.notes.trim().to_string()).filter(|notes| !notes.is_empty());
        Ok(Record {
            id,
            title: self.title.trim().to_string(),
            date,
            category: self.category,
            notes,
            is_lunar: self.is_lunar,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_stored_layout() {
        let raw = r#"{"id":"1","name":"示例: 妈妈生日","date":"1975-05-20","type":"BIRTHDAY","notes":"喜欢花"}"#;
        let record: Record = serde_json::from_str(raw).expect("record parses");
        assert_eq!(record.id.as_str(), "1");
        assert_eq!(record.title, "示例: 妈妈生日");
        assert_eq!(record.date, NaiveDate::from_ymd_opt(1975, 5, 20).unwrap());
        assert_eq!(record.category, Category::Birthday);
        assert_eq!(record.notes(), Some("喜欢花"));
        assert_eq!(record.is_lunar, None);
    }

    #[test]
    fn serializes_without_absent_optionals() {
        let record = Record::new(
            RecordId::new("abc"),
            "Wedding",
            NaiveDate::from_ymd_opt(2020, 10, 1).unwrap(),
            Category::Anniversary,
        );
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"id":"abc","name":"Wedding","date":"2020-10-01","type":"ANNIVERSARY"}"#
        );
    }

    #[test]
    fn lunar_flag_survives_round_trip() {
        let raw = r#"{"id":"x","name":"Grandpa","date":"1940-02-01","type":"OTHER","isLunar":true}"#;
        let record: Record = serde_json::from_str(raw).unwrap();
        assert_eq!(record.is_lunar, Some(true));
        assert!(serde_json::to_string(&record).unwrap().contains(r#""isLunar":true"#));
    }

    #[test]
    fn category_parses_from_cli_names_and_labels() {
        assert_eq!("Birthday".parse::<Category>(), Ok(Category::Birthday));
        assert_eq!("纪念日".parse::<Category>(), Ok(Category::Anniversary));
        assert!("holiday".parse::<Category>().is_err());
        assert_eq!(Category::default(), Category::Birthday);
    }

    #[test]
    fn draft_rejects_empty_title_and_bad_dates() {
        let draft = RecordDraft::new("   ", "2000-01-01", Category::Other);
        assert_eq!(draft.validate(), Err(DraftError::EmptyTitle));

        let draft = RecordDraft::new("Mom", "", Category::Birthday);
        assert_eq!(draft.validate(), Err(DraftError::MissingDate));

        let draft = RecordDraft::new("Mom", "2023-02-29", Category::Birthday);
        assert_eq!(
            draft.validate(),
            Err(DraftError::InvalidDate("2023-02-29".into()))
        );
    }

    #[test]
    fn draft_normalizes_blank_notes() {
        let record = RecordDraft::new(" Mom ", "1975-05-20", Category::Birthday)
            .with_notes("  ")
            .into_record(RecordId::new("1"))
            .expect("valid draft");
        assert_eq!(record.title, "Mom");
        assert_eq!(record.notes, None);
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(RecordId::generate(), RecordId::generate());
    }
}
