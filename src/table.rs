use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroUsize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// A present, non-null field value. Absent and null fields are `None` at
/// the `Record::field` level and never reach comparison or matching.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Number(f64),
    Text(Cow<'a, str>),
}

impl FieldValue<'_> {
    fn as_text(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Number(n) => Cow::Owned(n.to_string()),
            FieldValue::Text(s) => Cow::Borrowed(s.as_ref()),
        }
    }
}

/// Anything the table engine can search and sort. Field names are always
/// supplied by the caller; implementations only answer lookups.
pub trait Record {
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;
}

impl Record for serde_json::Map<String, serde_json::Value> {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match self.get(name)? {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number),
            serde_json::Value::String(s) => Some(FieldValue::Text(Cow::Borrowed(s.as_str()))),
            serde_json::Value::Bool(b) => Some(FieldValue::Text(Cow::Owned(b.to_string()))),
            other => Some(FieldValue::Text(Cow::Owned(other.to_string()))),
        }
    }
}

impl Record for serde_json::Value {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        self.as_object()?.field(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableQuerySpec {
    pub search_text: String,
    pub sort_key: Option<String>,
    pub sort_direction: SortDirection,
    pub page: usize,
    pub page_size: NonZeroUsize,
}

impl Default for TableQuerySpec {
    fn default() -> Self {
        Self {
            search_text: String::new(),
            sort_key: None,
            sort_direction: SortDirection::Asc,
            page: 1,
            page_size: NonZeroUsize::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSpec {
    pub field: &'static str,
    pub message: String,
}

impl InvalidSpec {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        "bad_params"
    }
}

impl fmt::Display for InvalidSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query.{}: {}", self.field, self.message)
    }
}

impl std::error::Error for InvalidSpec {}

impl TableQuerySpec {
    /// Strict parse of a wire-level query object. Missing keys take the
    /// defaults; present keys must be well-typed and positive. Over-range
    /// pages are left for `paginate` to clamp.
    pub fn from_json(raw: Option<&serde_json::Value>) -> Result<Self, InvalidSpec> {
        let mut spec = Self::default();
        let Some(raw) = raw else {
            return Ok(spec);
        };
        if raw.is_null() {
            return Ok(spec);
        }
        let Some(obj) = raw.as_object() else {
            return Err(InvalidSpec::new("", "query must be an object"));
        };

        match obj.get("searchText") {
            None => {}
            Some(v) if v.is_null() => {}
            Some(v) => {
                let Some(s) = v.as_str() else {
                    return Err(InvalidSpec::new("searchText", "must be a string"));
                };
                spec.search_text = s.to_string();
            }
        }

        match obj.get("sortKey") {
            None => {}
            Some(v) if v.is_null() => {}
            Some(v) => {
                let Some(s) = v.as_str() else {
                    return Err(InvalidSpec::new("sortKey", "must be a string or null"));
                };
                let t = s.trim();
                if !t.is_empty() {
                    spec.sort_key = Some(t.to_string());
                }
            }
        }

        match obj.get("sortDirection") {
            None => {}
            Some(v) if v.is_null() => {}
            Some(v) => {
                spec.sort_direction = match v.as_str().map(|s| s.to_ascii_lowercase()) {
                    Some(d) if d == "asc" => SortDirection::Asc,
                    Some(d) if d == "desc" => SortDirection::Desc,
                    _ => {
                        return Err(InvalidSpec::new(
                            "sortDirection",
                            "must be 'asc' or 'desc'",
                        ))
                    }
                };
            }
        }

        if let Some(v) = obj.get("page").filter(|v| !v.is_null()) {
            match v.as_i64() {
                Some(n) if n >= 1 => spec.page = n as usize,
                _ => return Err(InvalidSpec::new("page", "must be a positive integer")),
            }
        }

        if let Some(v) = obj.get("pageSize").filter(|v| !v.is_null()) {
            let size = v
                .as_i64()
                .filter(|n| *n > 0)
                .and_then(|n| NonZeroUsize::new(n as usize));
            match size {
                Some(n) => spec.page_size = n,
                None => return Err(InvalidSpec::new("pageSize", "must be a positive integer")),
            }
        }

        Ok(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableQueryResult<T> {
    pub rows: Vec<T>,
    pub total_matched: usize,
    pub total_pages: usize,
    pub page: usize,
}

/// Lowercased text with diacritics stripped, so "Émeka" compares and
/// matches like "emeka". Not a full collation: letters outside Latin
/// decomposition (e.g. "ß", "ø") keep their code point order.
fn fold_text(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Case- and accent-insensitive substring match over the named fields.
/// Blank search text passes every record through.
pub fn search<'r, R, S>(records: &'r [R], fields: &[S], text: &str) -> Vec<&'r R>
where
    R: Record,
    S: AsRef<str>,
{
    if text.trim().is_empty() {
        return records.iter().collect();
    }
    let needle = fold_text(text);
    records
        .iter()
        .filter(|r| {
            fields.iter().any(|f| {
                r.field(f.as_ref())
                    .map(|v| fold_text(&v.as_text()).contains(&needle))
                    .unwrap_or(false)
            })
        })
        .collect()
}

fn compare_values(a: &FieldValue<'_>, b: &FieldValue<'_>) -> Ordering {
    match (a, b) {
        (FieldValue::Number(x), FieldValue::Number(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        _ => fold_text(&a.as_text()).cmp(&fold_text(&b.as_text())),
    }
}

/// Stable sort on one field. Records missing the field (or holding null)
/// sort after every present value in both directions.
pub fn sort<'r, R: Record>(rows: Vec<&'r R>, key: &str, direction: SortDirection) -> Vec<&'r R> {
    let mut rows = rows;
    rows.sort_by(|a, b| match (a.field(key), b.field(key)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ord = compare_values(&x, &y);
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    });
    rows
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub page: usize,
    pub total_pages: usize,
}

pub fn total_pages(total: usize, page_size: NonZeroUsize) -> usize {
    total.div_ceil(page_size.get())
}

/// Slice out one page. The requested page is clamped into
/// `1..=total_pages`; an empty input yields zero pages and no rows.
pub fn paginate<T>(rows: Vec<T>, page: usize, page_size: NonZeroUsize) -> Page<T> {
    let total_pages = total_pages(rows.len(), page_size);
    let page = page.clamp(1, total_pages.max(1));
    let start = (page - 1) * page_size.get();
    let rows: Vec<T> = rows
        .into_iter()
        .skip(start)
        .take(page_size.get())
        .collect();
    Page {
        rows,
        page,
        total_pages,
    }
}

/// search -> sort -> paginate. The input slice is never reordered.
pub fn query<'r, R, S>(
    records: &'r [R],
    fields: &[S],
    spec: &TableQuerySpec,
) -> TableQueryResult<&'r R>
where
    R: Record,
    S: AsRef<str>,
{
    let matched = search(records, fields, &spec.search_text);
    let total_matched = matched.len();
    let sorted = match spec.sort_key.as_deref() {
        Some(key) => sort(matched, key, spec.sort_direction),
        None => matched,
    };
    let page = paginate(sorted, spec.page, spec.page_size);
    TableQueryResult {
        rows: page.rows,
        total_matched,
        total_pages: page.total_pages,
        page: page.page,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    fn names(rows: &[&Value]) -> Vec<String> {
        rows.iter()
            .map(|r| r["name"].as_str().unwrap_or("<null>").to_string())
            .collect()
    }

    fn roster() -> Vec<Value> {
        let first = [
            "Adaeze", "Bola", "Chidi", "Dayo", "Emeka", "Funke", "Gbenga", "Hauwa", "Ifeoma",
            "Jide", "Kemi", "Lanre", "Musa", "Ngozi", "Obi", "Peju", "Rotimi", "Sade", "Tunde",
            "Uche", "Wale", "Yemi", "Zainab", "Kunle", "Toyin",
        ];
        first
            .iter()
            .enumerate()
            .map(|(i, n)| json!({ "id": i + 1, "name": n, "average": 40 + (i * 7) % 60 }))
            .collect()
    }

    #[test]
    fn search_is_case_insensitive_and_blank_passes_through() {
        let records = roster();
        let fields = ["name"];
        assert_eq!(search(&records, &fields, "").len(), 25);
        assert_eq!(search(&records, &fields, "   ").len(), 25);
        let hits = search(&records, &fields, "NGO");
        assert_eq!(names(&hits), vec!["Ngozi"]);
    }

    #[test]
    fn accented_names_sort_and_match_with_their_base_letters() {
        let records = vec![
            json!({ "name": "Zainab" }),
            json!({ "name": "Émeka" }),
            json!({ "name": "emeka" }),
            json!({ "name": "Bola" }),
        ];
        let fields = ["name"];
        let all = search(&records, &fields, "");
        let sorted = sort(all, "name", SortDirection::Asc);
        assert_eq!(names(&sorted), vec!["Bola", "Émeka", "emeka", "Zainab"]);

        let hits = search(&records, &fields, "EME");
        assert_eq!(names(&hits), vec!["Émeka", "emeka"]);
        let hits = search(&records, &fields, "émé");
        assert_eq!(names(&hits), vec!["Émeka", "emeka"]);
    }

    #[test]
    fn search_matches_stringified_numbers() {
        let records = vec![
            json!({ "name": "A", "room": 101 }),
            json!({ "name": "B", "room": 202 }),
        ];
        let hits = search(&records, &["room"], "10");
        assert_eq!(names(&hits), vec!["A"]);
    }

    #[test]
    fn null_field_never_matches_but_other_fields_still_can() {
        let records = vec![
            json!({ "name": null, "email": "null@school.ng" }),
            json!({ "name": "Nullah", "email": null }),
            json!({ "email": "x@school.ng" }),
        ];
        let hits = search(&records, &["name"], "null");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["name"], "Nullah");

        let hits = search(&records, &["name", "email"], "null");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0]["email"], "null@school.ng");
    }

    #[test]
    fn only_named_fields_are_searched() {
        let records = vec![json!({ "name": "Tunde", "secret": "match" })];
        assert!(search(&records, &["name"], "match").is_empty());
    }

    #[test]
    fn sort_is_stable_for_duplicate_keys() {
        let records = vec![
            json!({ "name": "b1", "grade": "B" }),
            json!({ "name": "a1", "grade": "A" }),
            json!({ "name": "b2", "grade": "b" }),
            json!({ "name": "a2", "grade": "a" }),
            json!({ "name": "b3", "grade": "B" }),
        ];
        let rows: Vec<&Value> = records.iter().collect();
        let asc = sort(rows.clone(), "grade", SortDirection::Asc);
        assert_eq!(names(&asc), vec!["a1", "a2", "b1", "b2", "b3"]);
        let desc = sort(rows, "grade", SortDirection::Desc);
        assert_eq!(names(&desc), vec!["b1", "b2", "b3", "a1", "a2"]);
    }

    #[test]
    fn sort_compares_numbers_numerically() {
        let records = vec![
            json!({ "name": "nine", "score": 9 }),
            json!({ "name": "eighty", "score": 80 }),
            json!({ "name": "ten", "score": 10.5 }),
        ];
        let rows: Vec<&Value> = records.iter().collect();
        let asc = sort(rows, "score", SortDirection::Asc);
        assert_eq!(names(&asc), vec!["nine", "ten", "eighty"]);
    }

    #[test]
    fn missing_values_sort_last_in_both_directions() {
        let records = vec![
            json!({ "name": "none" }),
            json!({ "name": "low", "score": 10 }),
            json!({ "name": "null", "score": null }),
            json!({ "name": "high", "score": 90 }),
        ];
        let rows: Vec<&Value> = records.iter().collect();
        let asc = sort(rows.clone(), "score", SortDirection::Asc);
        assert_eq!(names(&asc), vec!["low", "high", "none", "null"]);
        let desc = sort(rows, "score", SortDirection::Desc);
        assert_eq!(names(&desc), vec!["high", "low", "none", "null"]);
    }

    #[test]
    fn paginate_clamps_page_into_range() {
        let rows: Vec<u32> = (1..=25).collect();
        let last = paginate(rows.clone(), 999, size(10));
        assert_eq!(last.page, 3);
        assert_eq!(last.total_pages, 3);
        assert_eq!(last.rows, vec![21, 22, 23, 24, 25]);

        let first = paginate(rows.clone(), 0, size(10));
        assert_eq!(first.page, 1);
        assert_eq!(first.rows.len(), 10);

        let exact = paginate((1..=20).collect::<Vec<u32>>(), 2, size(10));
        assert_eq!(exact.total_pages, 2);
        assert_eq!(exact.rows, (11..=20).collect::<Vec<u32>>());
    }

    #[test]
    fn paginate_empty_input_has_zero_pages() {
        let page = paginate(Vec::<u32>::new(), 4, size(10));
        assert_eq!(page.total_pages, 0);
        assert!(page.rows.is_empty());
        assert_eq!(page.page, 1);
    }

    #[test]
    fn query_filters_before_counting_and_paginating() {
        let records = roster();
        let expected_matches = records
            .iter()
            .filter(|r| {
                r["name"]
                    .as_str()
                    .map(|s| s.to_lowercase().contains('a'))
                    .unwrap_or(false)
            })
            .count();
        assert!(expected_matches < 25);

        let spec = TableQuerySpec {
            search_text: "a".to_string(),
            sort_key: Some("name".to_string()),
            sort_direction: SortDirection::Asc,
            page: 2,
            page_size: size(10),
        };
        let result = query(&records, &["name"], &spec);
        assert_eq!(result.total_matched, expected_matches);
        assert!(result.rows.len() <= 10);
        assert_eq!(result.total_pages, expected_matches.div_ceil(10));

        let again = query(&records, &["name"], &spec);
        assert_eq!(result, again);
        // Source order untouched.
        assert_eq!(records[0]["name"], "Adaeze");
    }

    #[test]
    fn query_sorts_the_filtered_set() {
        let records = roster();
        let spec = TableQuerySpec {
            search_text: "e".to_string(),
            sort_key: Some("average".to_string()),
            sort_direction: SortDirection::Desc,
            page: 1,
            page_size: size(50),
        };
        let result = query(&records, &["name"], &spec);
        let averages: Vec<f64> = result
            .rows
            .iter()
            .map(|r| r["average"].as_f64().unwrap_or(0.0))
            .collect();
        let mut sorted = averages.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        assert_eq!(averages, sorted);
        assert_eq!(result.rows.len(), result.total_matched);
    }

    #[test]
    fn spec_parse_defaults_and_strictness() {
        let spec = TableQuerySpec::from_json(None).expect("default");
        assert_eq!(spec, TableQuerySpec::default());
        assert_eq!(spec.page_size.get(), DEFAULT_PAGE_SIZE);

        let raw = json!({
            "searchText": "ade",
            "sortKey": "name",
            "sortDirection": "DESC",
            "page": 3,
            "pageSize": 5
        });
        let spec = TableQuerySpec::from_json(Some(&raw)).expect("parse");
        assert_eq!(spec.search_text, "ade");
        assert_eq!(spec.sort_key.as_deref(), Some("name"));
        assert_eq!(spec.sort_direction, SortDirection::Desc);
        assert_eq!(spec.page, 3);
        assert_eq!(spec.page_size.get(), 5);

        let e = TableQuerySpec::from_json(Some(&json!({ "pageSize": 0 }))).expect_err("size");
        assert_eq!(e.field, "pageSize");
        let e = TableQuerySpec::from_json(Some(&json!({ "page": 0 }))).expect_err("page");
        assert_eq!(e.field, "page");
        let e = TableQuerySpec::from_json(Some(&json!({ "page": 1.5 }))).expect_err("page");
        assert_eq!(e.field, "page");
        let e = TableQuerySpec::from_json(Some(&json!({ "sortDirection": "up" })))
            .expect_err("direction");
        assert_eq!(e.code(), "bad_params");
    }
}
