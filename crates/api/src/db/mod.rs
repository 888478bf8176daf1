//! Database schema, migrations, and query builders.
//!
//! Builders return `(sql, values)` pairs rendered for SQLite; the server
//! binds the values and maps rows positionally. Each `*_columns` helper
//! documents the column order its row mapper expects.

pub mod calendar;
pub mod migrations;
pub mod reminders;
pub mod stakeholders;
pub mod tables;
pub mod tasks;
pub mod users;
pub mod verification_tokens;

// Re-export tables for convenience
pub use tables::*;

pub type Built = (String, sea_query::Values);

/// `LIKE` pattern matching `needle` anywhere. `%`, `_` and `!` in the input
/// match literally, escaped with `!`.
pub(crate) fn contains_pattern(needle: &str) -> sea_query::LikeExpr {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '!' | '%' | '_') {
            pattern.push('!');
        }
        pattern.push(c);
    }
    pattern.push('%');
    sea_query::LikeExpr::new(pattern).escape('!')
}

/// Result of building a paginated list query.
pub struct BuiltListQuery {
    pub count_query: Built,
    pub select_query: Built,
    pub page: u32,
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::{Expr, Query, SqliteQueryBuilder};

    #[test]
    fn contains_pattern_escapes_wildcards() {
        let (sql, values) = Query::select()
            .expr(Expr::val(1))
            .and_where(Expr::col(Tasks::Title).like(contains_pattern("50%_off!")))
            .build(SqliteQueryBuilder);
        assert!(sql.contains(r#""title" LIKE ? ESCAPE '!'"#), "{sql}");
        assert_eq!(values.0.last(), Some(&"%50!%!_off!!%".into()));
    }
}
