use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::record::{Category, Record, UnknownCategory};
use crate::recurrence;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeFilter {
    #[default]
    All,
    Only(Category),
}

impl TypeFilter {
    pub fn matches(self, category: Category) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(wanted) => wanted == category,
        }
    }
}

impl FromStr for TypeFilter {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") || trimmed == "全部" {
            return Ok(TypeFilter::All);
        }
        trimmed.parse().map(TypeFilter::Only)
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeFilter::All => f.write_str("全部"),
            TypeFilter::Only(category) => f.write_str(category.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    DaysUntil,
    Title,
    Date,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub key: SortKey,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewQuery {
    pub search: String,
    pub filter: TypeFilter,
    pub sort: SortOrder,
}

impl ViewQuery {
    pub fn new(search: impl Into<String>, filter: TypeFilter) -> Self {
        Self {
            search: search.into(),
            filter,
            sort: SortOrder::default(),
        }
    }

    pub fn sorted_by(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.sort = SortOrder { key, direction };
        self
    }

    /// Both predicates: case-insensitive title substring and category.
    pub fn matches(&self, record: &Record) -> bool {
        let needle = self.search.to_lowercase();
        let matches_search = needle.is_empty() || record.title.to_lowercase().contains(&needle);
        matches_search && self.filter.matches(record.category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEntry {
    pub record: Record,
    pub days_until: i64,
    pub elapsed_years: i32,
}

impl ViewEntry {
    pub fn new(record: Record, today: NaiveDate) -> Self {
        let days_until = recurrence::days_until_next_occurrence(record.date, today);
        let elapsed_years = recurrence::elapsed_years(record.date, today);
        Self {
            record,
            days_until,
            elapsed_years,
        }
    }
}

/// Filtered, ordered projection of the record set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct View {
    pub entries: Vec<ViewEntry>,
}

impl View {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewEntry> {
        self.entries.iter()
    }

    /// The most urgent entry, shown as the summary banner.
    pub fn next_up(&self) -> Option<&ViewEntry> {
        self.entries.first()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().map(|entry| &entry.record)
    }
}

/// Filters `records` by `query` and orders them, stably, by the query's sort
/// key. Equal keys keep their input order.
pub fn build_view<'a, I>(records: I, query: &ViewQuery, today: NaiveDate) -> View
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut entries: Vec<ViewEntry> = records
        .into_iter()
        .filter(|record| query.matches(record))
        .map(|record| ViewEntry::new(record.clone(), today))
        .collect();

    entries.sort_by(|a, b| {
        let ordering = match query.sort.key {
            SortKey::DaysUntil => a.days_until.cmp(&b.days_until),
            SortKey::Title => a.record.title.cmp(&b.record.title),
            SortKey::Date => a.record.date.cmp(&b.record.date),
        };
        match query.sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });

    View { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;
    use chrono::{Datelike, Duration};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn due_in(title: &str, days: i64, category: Category) -> Record {
        let date = (today() + Duration::days(days)).with_year(1990).unwrap();
        Record::new(RecordId::new(title), title, date, category)
    }

    fn titles(view: &View) -> Vec<&str> {
        view.records().map(|record| record.title.as_str()).collect()
    }

    #[test]
    fn orders_by_days_until_with_stable_ties() {
        let records = vec![
            due_in("Ann", 5, Category::Birthday),
            due_in("Bob", 5, Category::Birthday),
            due_in("Cy", 1, Category::Other),
        ];
        let view = build_view(&records, &ViewQuery::default(), today());
        assert_eq!(titles(&view), vec!["Cy", "Ann", "Bob"]);
        assert_eq!(view.entries[0].days_until, 1);
        assert_eq!(view.next_up().map(|e| e.record.title.as_str()), Some("Cy"));
    }

    #[test]
    fn reversed_input_reverses_tied_entries() {
        let forward = vec![
            due_in("Ann", 3, Category::Birthday),
            due_in("Bob", 3, Category::Birthday),
        ];
        let view = build_view(&forward, &ViewQuery::default(), today());
        assert_eq!(titles(&view), vec!["Ann", "Bob"]);

        let reversed: Vec<Record> = forward.iter().rev().cloned().collect();
        let view = build_view(&reversed, &ViewQuery::default(), today());
        assert_eq!(titles(&view), vec!["Bob", "Ann"]);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let records = vec![
            due_in("Mom's Birthday", 10, Category::Birthday),
            due_in("Dad", 2, Category::Birthday),
        ];
        let view = build_view(&records, &ViewQuery::new("mom", TypeFilter::All), today());
        assert_eq!(titles(&view), vec!["Mom's Birthday"]);
    }

    #[test]
    fn filter_is_exactly_the_conjunction_of_both_predicates() {
        let records = vec![
            due_in("Mom birthday", 10, Category::Birthday),
            due_in("Mom & Dad wedding", 20, Category::Anniversary),
            due_in("Dad", 2, Category::Birthday),
            due_in("Moving day", 4, Category::Other),
        ];
        let query = ViewQuery::new("MOM", TypeFilter::Only(Category::Birthday));
        let view = build_view(&records, &query, today());

        for entry in view.iter() {
            assert!(query.matches(&entry.record));
        }
        let expected = records.iter().filter(|r| query.matches(r)).count();
        assert_eq!(view.len(), expected);
        assert_eq!(titles(&view), vec!["Mom birthday"]);
    }

    #[test]
    fn building_twice_gives_identical_views() {
        let records = vec![
            due_in("A", 7, Category::Other),
            due_in("B", 0, Category::Other),
            due_in("C", 7, Category::Other),
        ];
        let query = ViewQuery::default();
        assert_eq!(
            build_view(&records, &query, today()),
            build_view(&records, &query, today())
        );
    }

    #[test]
    fn empty_input_gives_empty_view() {
        let view = build_view(&Vec::<Record>::new(), &ViewQuery::default(), today());
        assert!(view.is_empty());
        assert!(view.next_up().is_none());
    }

    #[test]
    fn alternate_sort_keys() {
        let records = vec![
            Record::new("1".into(), "b", NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(), Category::Other),
            Record::new("2".into(), "a", NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(), Category::Other),
        ];
        let by_title = ViewQuery::default().sorted_by(SortKey::Title, SortDirection::Ascending);
        assert_eq!(titles(&build_view(&records, &by_title, today())), vec!["a", "b"]);

        let by_date_desc = ViewQuery::default().sorted_by(SortKey::Date, SortDirection::Descending);
        assert_eq!(titles(&build_view(&records, &by_date_desc, today())), vec!["b", "a"]);
    }

    #[test]
    fn type_filter_parses() {
        assert_eq!("all".parse::<TypeFilter>(), Ok(TypeFilter::All));
        assert_eq!(
            "anniversary".parse::<TypeFilter>(),
            Ok(TypeFilter::Only(Category::Anniversary))
        );
    }
}
