//! The ordered SQL fragment builder.
//!
//! A fragment is an in-progress statement at a specific stage of the
//! logical execution order. Advancing to a later stage appends text;
//! advancing backward wraps the current fragment as a subquery with a
//! deterministic alias and restarts from `FROM`. Callers therefore
//! never manage parentheses, and pushdown preserves logical order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::dialect::Dialect;

/// The stages of a statement, in logical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SqlStage {
    /// `FROM table`
    From,
    /// `JOIN … ON …`
    Join,
    /// `WHERE …`
    Where,
    /// `GROUP BY …`
    Group,
    /// `HAVING …`
    Having,
    /// `ORDER BY …`
    Order,
    /// `LIMIT …` / `OFFSET …`
    Limit,
    /// `SELECT …` — the projection closes the statement.
    Select,
    /// `… UNION ALL …`
    Union,
}

/// An in-progress SQL statement.
///
/// Below the Select stage the text starts at `FROM`; from Select on it
/// is a complete statement. Note that `ORDER BY` on most engines is
/// not a stable sort; ties may reorder between executions.
#[derive(Debug, Clone)]
pub struct SqlFragment {
    sql: String,
    stage: SqlStage,
    alias: String,
}

impl SqlFragment {
    /// A fragment reading a table, aliased to its own name.
    #[must_use]
    pub fn table(name: &str, dialect: &dyn Dialect) -> Self {
        let quoted = dialect.quote_identifier(name);
        Self {
            sql: format!("FROM {quoted} AS {quoted}"),
            stage: SqlStage::From,
            alias: name.to_string(),
        }
    }

    /// The alias column references must qualify with at the current
    /// stage.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The current stage.
    #[must_use]
    pub const fn stage(&self) -> SqlStage {
        self.stage
    }

    /// The complete SELECT statement for this fragment.
    #[must_use]
    pub fn sql_string(&self) -> String {
        if self.stage >= SqlStage::Select {
            self.sql.clone()
        } else {
            format!("SELECT * {}", self.sql)
        }
    }

    /// Wraps the fragment as a subquery restarting at `FROM`. The
    /// alias derives from a hash of the subquery text, so repeated
    /// builds emit identical SQL.
    fn wrapped(&self, dialect: &dyn Dialect) -> Self {
        let inner = self.sql_string();
        let alias = derived_alias(&inner);
        Self {
            sql: format!("FROM ({inner}) AS {}", dialect.quote_identifier(&alias)),
            stage: SqlStage::From,
            alias,
        }
    }

    /// A fragment ready to accept a clause at `stage`: unchanged when
    /// the stage lies ahead, wrapped as a subquery when it would go
    /// backward. Idempotent on an already-advanced fragment.
    #[must_use]
    pub fn advanced(&self, stage: SqlStage, dialect: &dyn Dialect) -> Self {
        if self.stage < stage {
            self.clone()
        } else {
            self.wrapped(dialect)
        }
    }

    /// The stage a filter lands on: `WHERE` before grouping, `HAVING`
    /// directly after it.
    #[must_use]
    pub fn filter_stage(&self) -> SqlStage {
        if self.stage == SqlStage::Group {
            SqlStage::Having
        } else {
            SqlStage::Where
        }
    }

    /// Appends a clause at `stage`, advancing (and wrapping if
    /// needed) first.
    #[must_use]
    pub fn appended(&self, stage: SqlStage, clause: &str, dialect: &dyn Dialect) -> Self {
        let mut next = self.advanced(stage, dialect);
        next.sql.push(' ');
        next.sql.push_str(clause);
        next.stage = stage;
        next
    }

    /// The fragment a projection builds on: a fragment that already
    /// carries a `LIMIT` (or is itself closed) wraps first, so the
    /// limit stays inside the subquery feeding the projection. Callers
    /// emit their select list against this base's alias.
    #[must_use]
    pub fn select_base(&self, dialect: &dyn Dialect) -> Self {
        if self.stage >= SqlStage::Limit {
            self.wrapped(dialect)
        } else {
            self.clone()
        }
    }

    /// Closes the statement with a projection, wrapping via
    /// [`SqlFragment::select_base`] when needed.
    #[must_use]
    pub fn with_select(
        &self,
        distinct: bool,
        select_list: Option<&str>,
        dialect: &dyn Dialect,
    ) -> Self {
        let base = self.select_base(dialect);
        let head = if distinct { "SELECT DISTINCT" } else { "SELECT" };
        let list = select_list.unwrap_or("*");
        Self {
            sql: format!("{head} {list} {}", base.sql),
            stage: SqlStage::Select,
            alias: base.alias,
        }
    }

    /// Appends another complete statement with `UNION ALL`.
    #[must_use]
    pub fn with_union(&self, other_sql: &str) -> Self {
        Self {
            sql: format!("{} UNION ALL {}", self.sql_string(), other_sql),
            stage: SqlStage::Union,
            alias: self.alias.clone(),
        }
    }
}

/// A deterministic alias for a subquery, derived from its text.
pub(crate) fn derived_alias(sql: &str) -> String {
    let mut hasher = DefaultHasher::new();
    sql.hash(&mut hasher);
    format!("t{:08x}", hasher.finish() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;

    fn dialect() -> PostgresDialect {
        PostgresDialect::new()
    }

    #[test]
    fn test_table_fragment() {
        let fragment = SqlFragment::table("orders", &dialect());
        assert_eq!(fragment.sql_string(), "SELECT * FROM \"orders\" AS \"orders\"");
        assert_eq!(fragment.alias(), "orders");
    }

    #[test]
    fn test_forward_advance_appends() {
        let fragment = SqlFragment::table("t", &dialect())
            .appended(SqlStage::Where, "WHERE \"t\".\"a\" > 1", &dialect())
            .appended(SqlStage::Order, "ORDER BY \"t\".\"a\" ASC", &dialect())
            .appended(SqlStage::Limit, "LIMIT 5", &dialect());
        assert_eq!(
            fragment.sql_string(),
            "SELECT * FROM \"t\" AS \"t\" WHERE \"t\".\"a\" > 1 ORDER BY \"t\".\"a\" ASC LIMIT 5"
        );
    }

    #[test]
    fn test_backward_advance_wraps() {
        let limited = SqlFragment::table("t", &dialect()).appended(
            SqlStage::Limit,
            "LIMIT 5",
            &dialect(),
        );
        let filtered = limited.advanced(SqlStage::Where, &dialect());
        assert_eq!(filtered.stage(), SqlStage::From);
        assert!(filtered
            .sql_string()
            .starts_with("SELECT * FROM (SELECT * FROM \"t\" AS \"t\" LIMIT 5) AS"));
        // The wrap alias is deterministic.
        let again = limited.advanced(SqlStage::Where, &dialect());
        assert_eq!(filtered.alias(), again.alias());
    }

    #[test]
    fn test_select_after_limit_keeps_limit_inside() {
        let fragment = SqlFragment::table("t", &dialect())
            .appended(SqlStage::Limit, "LIMIT 5", &dialect())
            .with_select(false, Some("\"x\" AS \"y\""), &dialect());
        let sql = fragment.sql_string();
        assert!(sql.starts_with("SELECT \"x\" AS \"y\" FROM (SELECT * FROM \"t\" AS \"t\" LIMIT 5) AS"));
    }

    #[test]
    fn test_filter_stage_after_group_is_having() {
        let grouped = SqlFragment::table("t", &dialect()).appended(
            SqlStage::Group,
            "GROUP BY \"t\".\"a\"",
            &dialect(),
        );
        assert_eq!(grouped.filter_stage(), SqlStage::Having);
        let fresh = SqlFragment::table("t", &dialect());
        assert_eq!(fresh.filter_stage(), SqlStage::Where);
    }

    #[test]
    fn test_union() {
        let left = SqlFragment::table("a", &dialect());
        let right = SqlFragment::table("b", &dialect());
        assert_eq!(
            left.with_union(&right.sql_string()).sql_string(),
            "SELECT * FROM \"a\" AS \"a\" UNION ALL SELECT * FROM \"b\" AS \"b\""
        );
    }

    #[test]
    fn test_select_distinct() {
        let fragment = SqlFragment::table("t", &dialect()).with_select(true, None, &dialect());
        assert_eq!(fragment.sql_string(), "SELECT DISTINCT * FROM \"t\" AS \"t\"");
    }
}
