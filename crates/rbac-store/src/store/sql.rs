//! SQL text and row mapping shared by the Postgres and SQLite backends.
//!
//! Dynamic SQL is limited to filter clauses built from the fixed
//! [`SLOT_COLUMNS`] allowlist; every value is bound, never interpolated.
use crate::record::{RuleFilter, RuleRecord, SLOT_COLUMNS, TypeMatch};
use sqlx::query::Query;
use sqlx::{Database, Encode, FromRow, Type};

pub(crate) const SELECT_RULES: &str = "SELECT ptype, v0, v1, v2, v3, v4, v5 FROM casbin_rule";
pub(crate) const DELETE_RULES: &str = "DELETE FROM casbin_rule";

/// Placeholder syntax of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placeholder {
    /// `$1, $2, ...` (Postgres)
    Numbered,
    /// `?` (SQLite)
    Question,
}

impl Placeholder {
    fn render(self, index: usize) -> String {
        match self {
            Placeholder::Numbered => format!("${index}"),
            Placeholder::Question => "?".to_string(),
        }
    }

    fn list(self, count: usize) -> String {
        (1..=count)
            .map(|index| self.render(index))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn insert_rule(self) -> String {
        format!(
            "INSERT INTO casbin_rule (ptype, v0, v1, v2, v3, v4, v5) VALUES ({}) \
             ON CONFLICT DO NOTHING",
            self.list(7)
        )
    }

    pub(crate) fn delete_rule(self) -> String {
        let mut clause = vec![format!("ptype = {}", self.render(1))];
        for (offset, column) in SLOT_COLUMNS.iter().enumerate() {
            clause.push(format!("{column} = {}", self.render(offset + 2)));
        }
        format!("{DELETE_RULES} WHERE {}", clause.join(" AND "))
    }
}

pub(crate) type RuleQuery<'q, DB> = Query<'q, DB, <DB as Database>::Arguments<'q>>;

/// Bind `ptype, v0..v5` in column order, matching [`Placeholder::insert_rule`]
/// and [`Placeholder::delete_rule`].
pub(crate) fn bind_record<'q, DB>(
    query: RuleQuery<'q, DB>,
    record: &'q RuleRecord,
) -> RuleQuery<'q, DB>
where
    DB: Database,
    String: Encode<'q, DB> + Type<DB>,
{
    record
        .values
        .iter()
        .fold(query.bind(&record.ptype), |query, value| query.bind(value))
}

/// Row shape of the `casbin_rule` table.
#[derive(Debug, FromRow)]
pub(crate) struct DbRule {
    ptype: String,
    v0: String,
    v1: String,
    v2: String,
    v3: String,
    v4: String,
    v5: String,
}

impl From<DbRule> for RuleRecord {
    fn from(row: DbRule) -> Self {
        RuleRecord::from_columns(row.ptype, [row.v0, row.v1, row.v2, row.v3, row.v4, row.v5])
    }
}

/// `WHERE` clause and bind values for `filter`.
///
/// Returns `None` when the filter can never match a row, so callers can skip
/// the round trip.
pub(crate) fn filter_clause(filter: &RuleFilter, style: Placeholder) -> Option<(String, Vec<String>)> {
    if filter.out_of_range() {
        return None;
    }
    let mut binds = Vec::new();
    let mut clause = Vec::new();
    match &filter.types {
        TypeMatch::Exact(ptype) => {
            binds.push(ptype.clone());
            clause.push(format!("ptype = {}", style.render(binds.len())));
        }
        TypeMatch::Section(section) => {
            // Case-sensitive prefix test; LIKE folds ASCII case in SQLite.
            binds.push(section.clone());
            clause.push(format!(
                "substr(ptype, 1, {}) = {}",
                section.chars().count(),
                style.render(binds.len())
            ));
        }
    }
    for (slot, value) in filter.constraints() {
        binds.push(value.to_string());
        clause.push(format!("{} = {}", SLOT_COLUMNS[slot], style.render(binds.len())));
    }
    Some((format!("WHERE {}", clause.join(" AND ")), binds))
}
