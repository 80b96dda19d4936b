//! Boundary contracts toward the host SQL engine.
//!
//! The engine itself is an external collaborator: the crate only needs a
//! way to compile and step the handful of range-index statements, read a
//! change stamp for cache invalidation, and inspect table schemas. A
//! binding for a real engine implements these traits over its native API;
//! [`mem`] is the bundled in-memory binding the test suite runs against.

#[cfg(any(test, feature = "testing-api"))]
pub mod mem;

use crate::{Error, Result, gri::create_gri_sql, gri::plan::GriStatement, gri::sql::GRI_COLUMNS};

pub type Rowid = i64;

/// A SQL value crossing the engine boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Per-connection modification stamp: the engine's data-version counter
/// paired with its total-changes counter. Equal stamps mean the connection
/// has observed no change; caches key on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeStamp {
    pub data_version: i64,
    pub total_changes: i64,
}

/// Schema facts the range index needs about a table.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub without_rowid: bool,
    pub columns: Vec<String>,
}

impl TableInfo {
    /// True once the table carries all four derived range-index columns.
    pub fn has_gri_columns(&self) -> bool {
        GRI_COLUMNS
            .iter()
            .all(|col| self.columns.iter().any(|c| c == col))
    }
}

/// A compiled statement: positional binds, stepped row by row.
pub trait Statement {
    /// Binds a value at a 1-based parameter index, resetting any rows.
    fn bind(&mut self, index: usize, value: Value) -> Result<()>;
    fn step(&mut self) -> Result<Option<Vec<Value>>>;
    fn reset(&mut self) -> Result<()>;
}

/// One open connection to the host engine.
pub trait Connection {
    type Stmt: Statement;

    fn prepare(&self, stmt: &GriStatement) -> Result<Self::Stmt>;
    fn execute_script(&self, sql: &str) -> Result<()>;
    fn table_info(&self, table: &str) -> Result<Option<TableInfo>>;
    fn change_stamp(&self) -> Result<ChangeStamp>;
    /// The caller's query-interrupt flag; long loops poll it.
    fn interrupted(&self) -> bool;

    /// Adds a genomic range index to `table`. The default goes through the
    /// generated DDL; engines with their own schema path may override.
    fn create_range_index(
        &self,
        table: &str,
        rid_expr: &str,
        beg_expr: &str,
        end_expr: &str,
        floor: u8,
    ) -> Result<()> {
        self.execute_script(&create_gri_sql(table, rid_expr, beg_expr, end_expr, floor)?)
    }
}

/// Checks that `table` exists, is rowid-addressable, and carries the
/// derived range-index columns.
pub fn ensure_gri_table<C: Connection>(conn: &C, table: &str) -> Result<TableInfo> {
    let info = conn
        .table_info(table)?
        .ok_or_else(|| Error::Schema(format!("no such table: {table}")))?;
    if info.without_rowid {
        return Err(Error::Schema(format!(
            "table {table} is not rowid-addressable"
        )));
    }
    if !info.has_gri_columns() {
        return Err(Error::Schema(format!(
            "table {table} has no genomic range index"
        )));
    }
    Ok(info)
}

pub type ScalarImpl = fn(&[Value]) -> Result<Value>;

/// A scalar SQL function to register with the host engine.
pub struct ScalarFunction {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub func: ScalarImpl,
}

impl ScalarFunction {
    /// Arity-checks and invokes the implementation.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if args.len() < self.min_args || args.len() > self.max_args {
            return Err(Error::Engine(format!(
                "{} takes {}..={} arguments, got {}",
                self.name,
                self.min_args,
                self.max_args,
                args.len()
            )));
        }
        (self.func)(args)
    }
}

/// A table-valued function's registration shape: output columns first,
/// then the hidden argument columns, per the usual TVF convention.
pub struct TableFunction {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub hidden_args: &'static [&'static str],
}
