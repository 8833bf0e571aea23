//! Select/join rendering for compiled join trees.

/// Types of joins a join tree can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "inner join",
            JoinType::LeftOuter => "left outer join",
        }
    }
}

/// A join clause: `<type> <table> <alias> on <left> = <right> and ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub join_type: JoinType,
    /// Table to join, schema-qualified if needed
    pub table: String,
    pub alias: String,
    /// Pairs of already-qualified expressions compared for equality
    pub on: Vec<(String, String)>,
}

impl JoinClause {
    pub fn new(
        join_type: JoinType,
        table: impl Into<String>,
        alias: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        Self {
            join_type,
            table: table.into(),
            alias: alias.into(),
            on: vec![(left.into(), right.into())],
        }
    }

    pub fn inner(
        table: impl Into<String>,
        alias: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        Self::new(JoinType::Inner, table, alias, left, right)
    }

    pub fn left_outer(
        table: impl Into<String>,
        alias: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        Self::new(JoinType::LeftOuter, table, alias, left, right)
    }

    fn to_sql(&self) -> String {
        let on: Vec<String> = self.on.iter().map(|(l, r)| format!("{l} = {r}")).collect();
        format!(
            "{} {} on {}",
            self.join_type.as_str(),
            table_ref(&self.table, &self.alias),
            on.join(" and ")
        )
    }
}

fn table_ref(table: &str, alias: &str) -> String {
    if table == alias {
        table.to_string()
    } else {
        format!("{table} {alias}")
    }
}

/// Alias of a projected column: `tableAlias_column`.
pub fn column_alias(table_alias: &str, column: &str) -> String {
    format!("{table_alias}_{column}")
}

/// A flat `select ... from ... join ... where ... order by ...` statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectQuery {
    projection: Vec<(String, String)>,
    from: String,
    from_alias: String,
    joins: Vec<JoinClause>,
    where_clause: Option<String>,
    order_by: Vec<String>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            from: table.into(),
            from_alias: alias.into(),
            ..Self::default()
        }
    }

    /// Project `expression as alias`.
    #[must_use]
    pub fn column(mut self, expression: impl Into<String>, alias: impl Into<String>) -> Self {
        self.projection.push((expression.into(), alias.into()));
        self
    }

    #[must_use]
    pub fn join(mut self, join: JoinClause) -> Self {
        self.joins.push(join);
        self
    }

    /// Replace the where clause.
    #[must_use]
    pub fn filter(mut self, condition: impl Into<String>) -> Self {
        self.where_clause = Some(condition.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, expression: impl Into<String>) -> Self {
        self.order_by.push(expression.into());
        self
    }

    pub fn projection(&self) -> &[(String, String)] {
        &self.projection
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn to_sql(&self) -> String {
        let columns: Vec<String> = self
            .projection
            .iter()
            .map(|(expr, alias)| format!("{expr} as {alias}"))
            .collect();
        let mut sql = format!(
            "select {} from {}",
            columns.join(", "),
            table_ref(&self.from, &self.from_alias)
        );
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }
        if let Some(condition) = &self.where_clause {
            sql.push_str(" where ");
            sql.push_str(condition);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" order by ");
            sql.push_str(&self.order_by.join(", "));
        }
        sql
    }
}
