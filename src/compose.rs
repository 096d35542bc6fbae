//! Composition of parameterized SQL.
//!
//! Values never become part of the SQL text: every value is bound under a named
//! placeholder (`:prefixN`) whose index is picked by the [`Statement`] builder,
//! so two fragments using the same prefix cannot collide.
//!
//! Writes spanning several tables are expressed as a [`WriteChain`]: the primary
//! row write, one step per relation table, and a final materializing select.
//! The chain is executed as one unit by [`crate::persist::Database::write`].

use std::collections::HashMap;

use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value};

use crate::datatype::Id;
use crate::error::{CodingError, Result};

/// Placeholder bound to the id of the row written by the primary step.
pub const OWNER: &str = ":owner";

/// A named parameter as it appears in the SQL text (`:label0`) with its value.
pub type Binding = (String, Value);

/// SQL affinity used when casting a bound value inside a VALUES list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    Integer,
    Real,
}

impl Cast {
    fn as_str(&self) -> &'static str {
        match self {
            Cast::Integer => "integer",
            Cast::Real => "real",
        }
    }
}

/// Copies a bindable value out of its `ToSql` form.
pub fn to_value<T: ToSql + ?Sized>(value: &T) -> Result<Value> {
    Ok(match value.to_sql()? {
        ToSqlOutput::Borrowed(v) => Value::from(v),
        ToSqlOutput::Owned(v) => v,
        _ => return Err(CodingError::Validation("unsupported parameter type".into())),
    })
}

/// Builds the `(:prefix0, :prefix1, …)` list for an IN clause.
///
/// An empty input yields an empty fragment and no bindings: the caller is
/// expected to leave the criterion out instead of emitting `IN ()`.
pub fn in_clause<T: ToSql>(prefix: &str, values: &[T]) -> Result<(String, Vec<Binding>)> {
    let mut statement = Statement::default();
    statement.push_in_list(prefix, values)?;
    Ok(statement.finish())
}

#[derive(Debug, Default, Clone)]
pub struct Statement {
    sql: String,
    params: Vec<Binding>,
    next: HashMap<String, usize>,
    owner: bool,
}

impl Statement {
    pub fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            ..Self::default()
        }
    }
    pub fn sql(&self) -> &str {
        &self.sql
    }
    pub fn params(&self) -> &[Binding] {
        &self.params
    }
    /// Whether the statement refers to [`OWNER`].
    pub fn uses_owner(&self) -> bool {
        self.owner
    }
    pub fn push(&mut self, fragment: &str) -> &mut Self {
        if !self.sql.is_empty() && !self.sql.ends_with([' ', '\n', '(']) && !fragment.starts_with([' ', ')', ',']) {
            self.sql.push(' ');
        }
        self.sql.push_str(fragment);
        self
    }
    fn placeholder(&mut self, prefix: &str) -> String {
        let next = self.next.entry(prefix.to_string()).or_insert(0);
        let name = format!(":{prefix}{next}");
        *next += 1;
        name
    }
    /// Binds `value` under the next free `:prefixN` and returns the placeholder
    /// without appending it.
    pub fn bind<T: ToSql + ?Sized>(&mut self, prefix: &str, value: &T) -> Result<String> {
        let value = to_value(value)?;
        let name = self.placeholder(prefix);
        self.params.push((name.clone(), value));
        Ok(name)
    }
    /// Like [`Statement::bind`] but wraps the placeholder in a cast, which keeps
    /// the column affinity of VALUES lists from depending on the first row.
    pub fn bind_cast<T: ToSql + ?Sized>(&mut self, prefix: &str, value: &T, cast: Cast) -> Result<String> {
        let name = self.bind(prefix, value)?;
        Ok(format!("cast({name} as {})", cast.as_str()))
    }
    /// Appends a bound value.
    pub fn push_value<T: ToSql + ?Sized>(&mut self, prefix: &str, value: &T) -> Result<&mut Self> {
        let name = self.bind(prefix, value)?;
        Ok(self.push(&name))
    }
    /// The placeholder for the owner id of a [`WriteChain`] step.
    pub fn owner(&mut self) -> &'static str {
        self.owner = true;
        OWNER
    }
    /// Appends `(:prefix0, …) ` for the given values. Returns false, appending
    /// nothing, when there are no values.
    pub fn push_in_list<T: ToSql>(&mut self, prefix: &str, values: &[T]) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let names = values
            .iter()
            .map(|value| self.bind(prefix, value))
            .collect::<Result<Vec<_>>>()?;
        self.push(&format!("({}) ", names.join(", ")));
        Ok(true)
    }
    /// Appends `VALUES (…), (…)` with one row per entry of `rows`, every column
    /// cast as given.
    pub fn push_values_rows(&mut self, rows: &[Vec<(&str, Value, Option<Cast>)>]) -> Result<&mut Self> {
        let mut rendered = Vec::with_capacity(rows.len());
        for row in rows {
            let mut columns = Vec::with_capacity(row.len());
            for (prefix, value, cast) in row {
                columns.push(match cast {
                    Some(cast) => self.bind_cast(prefix, value, *cast)?,
                    None => self.bind(prefix, value)?,
                });
            }
            rendered.push(format!("({})", columns.join(", ")));
        }
        Ok(self.push(&format!("values {}", rendered.join(", "))))
    }
    pub fn finish(self) -> (String, Vec<Binding>) {
        (self.sql, self.params)
    }
    /// Parameters in the form rusqlite accepts, including the owner id when the
    /// statement refers to it.
    pub fn named_params<'a>(&'a self, owner: Option<&'a Id>) -> Vec<(&'a str, &'a dyn ToSql)> {
        let mut params: Vec<(&str, &dyn ToSql)> = self
            .params
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        if let (true, Some(owner)) = (self.owner, owner) {
            params.push((OWNER, owner as &dyn ToSql));
        }
        params
    }
}

/// A relation table owned by a resource: one row per (owner, target) pair.
#[derive(Debug, Clone, Copy)]
pub struct Link<'a> {
    pub table: &'a str,
    pub owner_column: &'a str,
    pub target_column: &'a str,
}

/// Whether the primary step inserts a new row or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Update(Id),
}

/// An atomic write of a resource together with its relation rows.
///
/// The primary statement must return the id of the written row
/// (`… returning id`). Every following step may refer to that id through
/// [`Statement::owner`]. The closing select materializes the whole resource.
#[derive(Debug, Clone)]
pub struct WriteChain {
    mode: WriteMode,
    primary: Statement,
    steps: Vec<Statement>,
    select: Statement,
}

impl WriteChain {
    pub fn new(mode: WriteMode, primary: Statement, select: Statement) -> Self {
        Self {
            mode,
            primary,
            steps: Vec::new(),
            select,
        }
    }
    pub fn mode(&self) -> WriteMode {
        self.mode
    }
    pub fn primary(&self) -> &Statement {
        &self.primary
    }
    pub fn steps(&self) -> &[Statement] {
        &self.steps
    }
    pub fn select(&self) -> &Statement {
        &self.select
    }
    pub fn step(&mut self, statement: Statement) -> &mut Self {
        self.steps.push(statement);
        self
    }
    /// Writes the full set of `targets` into `link`. On update the owner's
    /// existing rows are deleted first. An empty set still contributes an
    /// insert step, selecting nothing, so every chain has the same shape.
    pub fn relation(&mut self, link: Link<'_>, prefix: &str, targets: &[Id]) -> Result<&mut Self> {
        if let WriteMode::Update(_) = self.mode {
            let mut delete = Statement::new(&format!("delete from {} where {} =", link.table, link.owner_column));
            let owner = delete.owner();
            delete.push(owner);
            self.steps.push(delete);
        }
        let mut insert = Statement::new(&format!(
            "insert into {} ({}, {}) select",
            link.table, link.owner_column, link.target_column
        ));
        let owner = insert.owner();
        if targets.is_empty() {
            insert.push(&format!("{owner}, null where 0"));
        } else {
            insert.push(&format!("{owner}, t.column1 from ("));
            let rows = targets
                .iter()
                .map(|id| -> Result<Vec<(&str, Value, Option<Cast>)>> {
                    Ok(vec![(prefix, to_value(id)?, Some(Cast::Integer))])
                })
                .collect::<Result<Vec<_>>>()?;
            insert.push_values_rows(&rows)?;
            insert.push(") as t");
        }
        self.steps.push(insert);
        Ok(self)
    }
}
