use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;

use crate::{
    Connection, Result, Statement, Value,
    engine::ensure_gri_table,
    gri::{
        cursor::RowidCursor,
        detect::DetectCache,
        level::LevelBounds,
        plan::GriStatement,
    },
};

/// Idle statements kept per table; beyond this they are simply dropped.
const MAX_POOLED: usize = 8;

struct StmtPool<S> {
    bounds: LevelBounds,
    idle: Vec<S>,
}

/// Per-connection state: the level-bounds cache and the per-table pools
/// of prepared overlap statements. Everything here dies with the
/// connection; nothing is shared across connections.
pub struct Session<C: Connection> {
    conn: C,
    detect: DetectCache,
    pools: Mutex<HashMap<String, StmtPool<C::Stmt>>>,
}

impl<C: Connection> Session<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            detect: DetectCache::default(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Adds a genomic range index to `table`.
    pub fn create_gri(
        &self,
        table: &str,
        rid_expr: &str,
        beg_expr: &str,
        end_expr: &str,
        floor: u8,
    ) -> Result<()> {
        let info = self.conn.table_info(table)?;
        if let Some(info) = &info {
            if info.without_rowid {
                return Err(crate::Error::Schema(format!(
                    "cannot index {table}: not rowid-addressable"
                )));
            }
            if info.has_gri_columns() {
                return Err(crate::Error::Schema(format!(
                    "table {table} already has a genomic range index"
                )));
            }
        }
        self.conn
            .create_range_index(table, rid_expr, beg_expr, end_expr, floor)
    }

    /// Occupied level bounds of the table's index, cached per connection
    /// until this connection observes a modification. `None` when empty.
    pub fn gri_levels(&self, table: &str) -> Result<Option<LevelBounds>> {
        self.detect.levels(&self.conn, table)
    }

    /// The `gri_levels` table-valued row: (_gri_ceiling, _gri_floor),
    /// with ceiling < floor as the empty-table sentinel.
    pub fn gri_levels_row(&self, table: &str) -> Result<(i64, i64)> {
        Ok(match self.gri_levels(table)? {
            Some(bounds) => (bounds.ceiling as i64, bounds.floor as i64),
            None => (-1, 0),
        })
    }

    /// Streams the rowids of features in `table` overlapping
    /// [qbeg, qend] on `qrid`, ascending and deduplicated.
    ///
    /// Explicit `bounds` (from a `gri_levels` join) skip detection;
    /// otherwise the cached detected bounds are used.
    pub fn overlapping_rowids(
        &self,
        table: &str,
        qrid: Value,
        qbeg: i64,
        qend: i64,
        bounds: Option<(i64, i64)>,
    ) -> Result<RowidCursor<'_, C>> {
        ensure_gri_table(&self.conn, table)?;

        let bounds = match bounds {
            Some((ceiling, floor)) => {
                if ceiling < floor {
                    // The explicit empty sentinel: nothing is indexed.
                    return Ok(RowidCursor::empty(self, table.to_string()));
                }
                LevelBounds::new(ceiling, floor)?
            }
            None => match self.gri_levels(table)? {
                Some(bounds) => bounds,
                None => return Ok(RowidCursor::empty(self, table.to_string())),
            },
        };

        let mut stmt = self.checkout(table, bounds)?;
        stmt.bind(1, qrid)?;
        stmt.bind(2, Value::Integer(qbeg))?;
        stmt.bind(3, Value::Integer(qend))?;
        Ok(RowidCursor::new(self, table.to_string(), bounds, stmt))
    }

    /// Pops an idle overlap statement for (table, bounds), evicting the
    /// pool when the bounds changed, or compiles a fresh one.
    fn checkout(&self, table: &str, bounds: LevelBounds) -> Result<C::Stmt> {
        {
            let mut pools = self.pools.lock();
            if let Some(pool) = pools.get_mut(table) {
                if pool.bounds != bounds {
                    debug!(
                        "evicting {} pooled statements for {table}: bounds {:?} -> {bounds:?}",
                        pool.idle.len(),
                        pool.bounds
                    );
                    pool.idle.clear();
                    pool.bounds = bounds;
                } else if let Some(stmt) = pool.idle.pop() {
                    return Ok(stmt);
                }
            }
        }
        self.conn
            .prepare(&GriStatement::overlap(table, bounds))
    }

    /// Returns a reset statement to its pool.
    pub(crate) fn recycle(&self, table: &str, bounds: LevelBounds, stmt: C::Stmt) {
        let mut pools = self.pools.lock();
        let pool = pools.entry(table.to_string()).or_insert_with(|| StmtPool {
            bounds,
            idle: Vec::new(),
        });
        if pool.bounds == bounds && pool.idle.len() < MAX_POOLED {
            pool.idle.push(stmt);
        }
    }

    #[cfg(test)]
    pub(crate) fn pooled(&self, table: &str) -> usize {
        self.pools
            .lock()
            .get(table)
            .map(|pool| pool.idle.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mem::{Feature, MemEngine};

    fn session_with_features(features: &[(i64, i64, i64)]) -> Session<MemEngine> {
        let engine = MemEngine::new();
        engine.create_table("t");
        let session = Session::new(engine);
        session.create_gri("t", "rid", "beg", "end", 0).unwrap();
        for &(rid, beg, end) in features {
            session
                .connection()
                .insert("t", Feature::new(rid, beg, end))
                .unwrap();
        }
        session
    }

    #[test]
    fn statements_are_pooled_and_reused() {
        let session = session_with_features(&[(1, 0, 10), (1, 5, 100)]);

        assert_eq!(session.pooled("t"), 0);
        let rowids = session
            .overlapping_rowids("t", Value::Integer(1), 0, 50, None)
            .unwrap()
            .collect_rowids()
            .unwrap();
        assert_eq!(rowids, vec![1, 2]);
        // EOF returned the statement to the pool.
        assert_eq!(session.pooled("t"), 1);

        let _ = session
            .overlapping_rowids("t", Value::Integer(1), 0, 50, None)
            .unwrap()
            .collect_rowids()
            .unwrap();
        assert_eq!(session.pooled("t"), 1);
    }

    #[test]
    fn pool_evicts_when_bounds_change() {
        let session = session_with_features(&[(1, 0, 10)]);
        let _ = session
            .overlapping_rowids("t", Value::Integer(1), 0, 50, None)
            .unwrap()
            .collect_rowids()
            .unwrap();
        assert_eq!(session.pooled("t"), 1);

        // A feature two buckets deeper moves the detected ceiling; the
        // pooled statement compiled for the old bounds must go.
        session
            .connection()
            .insert("t", Feature::new(1, 0, 5000))
            .unwrap();
        let rowids = session
            .overlapping_rowids("t", Value::Integer(1), 0, 50, None)
            .unwrap()
            .collect_rowids()
            .unwrap();
        assert_eq!(rowids, vec![1, 2]);
        assert_eq!(session.pooled("t"), 1);
    }

    #[test]
    fn explicit_bounds_skip_detection() {
        let session = session_with_features(&[(1, 0, 10)]);
        let rowids = session
            .overlapping_rowids("t", Value::Integer(1), 0, 50, Some((15, 0)))
            .unwrap()
            .collect_rowids()
            .unwrap();
        assert_eq!(rowids, vec![1]);

        // The empty sentinel from gri_levels means nothing is indexed.
        let rowids = session
            .overlapping_rowids("t", Value::Integer(1), 0, 50, Some((-1, 0)))
            .unwrap()
            .collect_rowids()
            .unwrap();
        assert!(rowids.is_empty());

        assert!(matches!(
            session.overlapping_rowids("t", Value::Integer(1), 0, 50, Some((20, 0))),
            Err(crate::Error::QueryPlan(_))
        ));
    }

    #[test]
    fn create_gri_rejects_double_indexing() {
        let session = session_with_features(&[]);
        assert!(matches!(
            session.create_gri("t", "rid", "beg", "end", 0),
            Err(crate::Error::Schema(_))
        ));
        assert!(matches!(
            session.gri_levels("missing"),
            Err(crate::Error::Schema(_))
        ));
    }
}
