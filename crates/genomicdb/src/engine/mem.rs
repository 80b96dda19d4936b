//! In-memory engine binding.
//!
//! Holds feature tables as rowid-keyed maps plus a sorted-tuple index with
//! the same (rid, lvl, beg, len) key order a SQL engine's B-tree would
//! have, and interprets [`GriStatement`] plans against it. Range scans,
//! NULL-level exclusion and UNION semantics match what the rendered SQL
//! does on a real engine, so the protocol layers above can be exercised
//! without one.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};

use crate::{
    ChangeStamp, Connection, Error, GriStatement, Result, Rowid, Statement, TableInfo, Value,
    gri::level::{LevelBounds, POW16, level_for_len},
    gri::sql::GRI_COLUMNS,
};

/// One feature row: (rid, beg, end) in zero-based half-open coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feature {
    pub rid: i64,
    pub beg: i64,
    pub end: i64,
}

impl Feature {
    pub fn new(rid: i64, beg: i64, end: i64) -> Self {
        Self { rid, beg, end }
    }

    fn len(&self) -> i64 {
        self.end - self.beg
    }
}

/// Index key: mirrors the B-tree column order (rid, lvl, beg, len), with
/// the rowid as the tie-breaking suffix every secondary index carries.
type IndexKey = (i64, i8, i64, i64, Rowid);

#[derive(Debug, Default)]
struct MemTable {
    floor: Option<u8>,
    next_rowid: Rowid,
    rows: BTreeMap<Rowid, Feature>,
    index: BTreeSet<IndexKey>,
}

impl MemTable {
    fn index_key(&self, rowid: Rowid, feature: &Feature) -> Option<IndexKey> {
        let floor = self.floor?;
        let lvl = level_for_len(feature.len(), floor)?;
        Some((feature.rid, lvl, feature.beg, feature.len(), rowid))
    }

    fn reindex(&mut self) {
        self.index.clear();
        let keys: Vec<IndexKey> = self
            .rows
            .iter()
            .filter_map(|(&rowid, feature)| self.index_key(rowid, feature))
            .collect();
        self.index.extend(keys);
    }
}

/// Cloneable handle on one in-memory "connection" (engine and connection
/// are the same object here; the change stamp behaves accordingly).
#[derive(Debug, Default, Clone)]
pub struct MemEngine(Arc<MemInner>);

#[derive(Debug, Default)]
struct MemInner {
    tables: RwLock<HashMap<String, MemTable>>,
    data_version: AtomicI64,
    total_changes: AtomicI64,
    interrupt: AtomicBool,
    scripts: Mutex<Vec<String>>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, name: &str) {
        self.0.tables.write().entry(name.to_string()).or_default();
    }

    pub fn insert(&self, table: &str, feature: Feature) -> Result<Rowid> {
        let mut tables = self.0.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::Engine(format!("no such table: {table}")))?;
        t.next_rowid += 1;
        let rowid = t.next_rowid;
        if let Some(key) = t.index_key(rowid, &feature) {
            t.index.insert(key);
        }
        t.rows.insert(rowid, feature);
        self.bump();
        Ok(rowid)
    }

    pub fn delete(&self, table: &str, rowid: Rowid) -> Result<bool> {
        let mut tables = self.0.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::Engine(format!("no such table: {table}")))?;
        let Some(feature) = t.rows.remove(&rowid) else {
            return Ok(false);
        };
        if let Some(key) = t.index_key(rowid, &feature) {
            t.index.remove(&key);
        }
        self.bump();
        Ok(true)
    }

    pub fn rows(&self, table: &str) -> Vec<(Rowid, Feature)> {
        self.0
            .tables
            .read()
            .get(table)
            .map(|t| t.rows.iter().map(|(&id, &f)| (id, f)).collect())
            .unwrap_or_default()
    }

    pub fn set_interrupted(&self, value: bool) {
        self.0.interrupt.store(value, Ordering::Relaxed);
    }

    /// Scripts handed to [`Connection::execute_script`], for assertions.
    pub fn scripts(&self) -> Vec<String> {
        self.0.scripts.lock().clone()
    }

    fn bump(&self) {
        self.0.data_version.fetch_add(1, Ordering::Relaxed);
        self.0.total_changes.fetch_add(1, Ordering::Relaxed);
    }

    fn execute_plan(&self, plan: &GriStatement, binds: &[Value; 3]) -> Result<Vec<Vec<Value>>> {
        let tables = self.0.tables.read();
        let t = tables
            .get(plan.table())
            .ok_or_else(|| Error::Engine(format!("no such table: {}", plan.table())))?;
        if t.floor.is_none() {
            return Err(Error::Engine(format!(
                "no such column: _gri_rid on {}",
                plan.table()
            )));
        }

        match plan {
            GriStatement::Overlap { bounds, .. } => Self::overlap(t, *bounds, binds),
            GriStatement::RidProgression { .. } => {
                // The recursive progression seeks the next-larger rid; over
                // the sorted index that is exactly the distinct rid set.
                let rids: BTreeSet<i64> = t.index.iter().map(|&(rid, ..)| rid).collect();
                Ok(rids
                    .into_iter()
                    .map(|rid| vec![Value::Integer(rid)])
                    .collect())
            }
            GriStatement::MinLevel { .. } => Self::level_seek(t, binds, false),
            GriStatement::MaxLevel { .. } => Self::level_seek(t, binds, true),
        }
    }

    fn overlap(t: &MemTable, bounds: LevelBounds, binds: &[Value; 3]) -> Result<Vec<Vec<Value>>> {
        // NULL in any comparison produces no rows, as in SQL.
        let (Some(qrid), Some(qbeg), Some(qend)) = (
            binds[0].as_integer(),
            binds[1].as_integer(),
            binds[2].as_integer(),
        ) else {
            return Ok(Vec::new());
        };

        let mut rowids = BTreeSet::new();
        for level in bounds.levels() {
            let lvl = -(level as i8);
            let lo = (qrid, lvl, qbeg - POW16[level as usize], i64::MIN, Rowid::MIN);
            let hi = (qrid, lvl, qend, i64::MAX, Rowid::MAX);
            for &(_, _, beg, len, rowid) in t.index.range(lo..=hi) {
                if beg + len >= qbeg {
                    rowids.insert(rowid);
                }
            }
        }
        Ok(rowids
            .into_iter()
            .map(|rowid| vec![Value::Integer(rowid)])
            .collect())
    }

    fn level_seek(t: &MemTable, binds: &[Value; 3], take_last: bool) -> Result<Vec<Vec<Value>>> {
        let Some(rid) = binds[0].as_integer() else {
            return Ok(Vec::new());
        };
        let lo = (rid, i8::MIN, i64::MIN, i64::MIN, Rowid::MIN);
        let hi = (rid, i8::MAX, i64::MAX, i64::MAX, Rowid::MAX);
        let mut range = t.index.range(lo..=hi);
        let hit = if take_last {
            range.next_back()
        } else {
            range.next()
        };
        Ok(hit
            .map(|&(_, lvl, ..)| vec![vec![Value::Integer(lvl as i64)]])
            .unwrap_or_default())
    }
}

/// A "compiled" plan plus its parameter bindings.
pub struct MemStatement {
    engine: MemEngine,
    plan: GriStatement,
    binds: [Value; 3],
    rows: Option<std::vec::IntoIter<Vec<Value>>>,
}

impl Statement for MemStatement {
    fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        if index == 0 || index > self.binds.len() {
            return Err(Error::Engine(format!("bind index {index} out of range")));
        }
        self.binds[index - 1] = value;
        self.rows = None;
        Ok(())
    }

    fn step(&mut self) -> Result<Option<Vec<Value>>> {
        if self.rows.is_none() {
            let rows = self.engine.execute_plan(&self.plan, &self.binds)?;
            self.rows = Some(rows.into_iter());
        }
        Ok(self.rows.as_mut().and_then(|rows| rows.next()))
    }

    fn reset(&mut self) -> Result<()> {
        self.rows = None;
        Ok(())
    }
}

impl Connection for MemEngine {
    type Stmt = MemStatement;

    fn prepare(&self, stmt: &GriStatement) -> Result<MemStatement> {
        // Compile-time checks a SQL engine would do: table and columns.
        let tables = self.0.tables.read();
        let t = tables
            .get(stmt.table())
            .ok_or_else(|| Error::Engine(format!("no such table: {}", stmt.table())))?;
        if t.floor.is_none() {
            return Err(Error::Engine(format!(
                "no such column: _gri_rid on {}",
                stmt.table()
            )));
        }
        Ok(MemStatement {
            engine: self.clone(),
            plan: stmt.clone(),
            binds: [Value::Null, Value::Null, Value::Null],
            rows: None,
        })
    }

    fn execute_script(&self, sql: &str) -> Result<()> {
        self.0.scripts.lock().push(sql.to_string());
        Ok(())
    }

    fn table_info(&self, table: &str) -> Result<Option<TableInfo>> {
        let tables = self.0.tables.read();
        Ok(tables.get(table).map(|t| {
            let mut columns = vec!["rid".to_string(), "beg".to_string(), "end".to_string()];
            if t.floor.is_some() {
                columns.extend(GRI_COLUMNS.iter().map(|c| c.to_string()));
            }
            TableInfo {
                name: table.to_string(),
                without_rowid: false,
                columns,
            }
        }))
    }

    fn change_stamp(&self) -> Result<ChangeStamp> {
        Ok(ChangeStamp {
            data_version: self.0.data_version.load(Ordering::Relaxed),
            total_changes: self.0.total_changes.load(Ordering::Relaxed),
        })
    }

    fn interrupted(&self) -> bool {
        self.0.interrupt.load(Ordering::Relaxed)
    }

    fn create_range_index(
        &self,
        table: &str,
        rid_expr: &str,
        beg_expr: &str,
        end_expr: &str,
        floor: u8,
    ) -> Result<()> {
        if floor > 15 {
            return Err(Error::QueryPlan(format!("floor {floor} out of range")));
        }
        // The in-memory schema is fixed, so the index expressions must be
        // its plain columns.
        if rid_expr.trim() != "rid" || beg_expr.trim() != "beg" || end_expr.trim() != "end" {
            return Err(Error::Engine(
                "mem engine indexes only its (rid, beg, end) columns".to_string(),
            ));
        }
        let mut tables = self.0.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::Engine(format!("no such table: {table}")))?;
        if t.floor.is_some() {
            return Err(Error::Engine(format!("index {table}__gri already exists")));
        }
        t.floor = Some(floor);
        t.reindex();
        drop(tables);
        self.bump();
        Ok(())
    }
}
