use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;

use crate::{
    ChangeStamp, Connection, Error, Result, Statement, Value,
    engine::ensure_gri_table,
    gri::{level::LevelBounds, plan::GriStatement},
};

/// Scans the occupied levels of `table`'s range index: one seek per rid
/// for the progression, plus one seek each for that rid's deepest and
/// shallowest level. `None` for an empty index.
pub fn detect_levels<C: Connection>(conn: &C, table: &str) -> Result<Option<LevelBounds>> {
    ensure_gri_table(conn, table)?;

    let mut rid_stmt = conn.prepare(&GriStatement::RidProgression {
        table: table.to_string(),
    })?;
    let mut min_stmt = conn.prepare(&GriStatement::MinLevel {
        table: table.to_string(),
    })?;
    let mut max_stmt = conn.prepare(&GriStatement::MaxLevel {
        table: table.to_string(),
    })?;

    // Stored levels are negated, so the per-rid minimum is the deepest
    // occupied level and the maximum the shallowest.
    let mut deepest: Option<i64> = None;
    let mut shallowest: Option<i64> = None;

    while let Some(row) = rid_stmt.step()? {
        if conn.interrupted() {
            return Err(Error::Cancelled);
        }
        let rid = row
            .first()
            .cloned()
            .ok_or_else(|| Error::Internal("rid progression yielded no column".to_string()))?;

        if let Some(lvl) = seek_level(&mut min_stmt, rid.clone())? {
            deepest = Some(deepest.map_or(lvl, |d| d.min(lvl)));
        }
        if let Some(lvl) = seek_level(&mut max_stmt, rid)? {
            shallowest = Some(shallowest.map_or(lvl, |s| s.max(lvl)));
        }
    }

    match (deepest, shallowest) {
        (Some(deepest), Some(shallowest)) => {
            Ok(Some(LevelBounds::new(-deepest, -shallowest)?))
        }
        _ => Ok(None),
    }
}

fn seek_level<S: Statement>(stmt: &mut S, rid: Value) -> Result<Option<i64>> {
    stmt.reset()?;
    stmt.bind(1, rid)?;
    let Some(row) = stmt.step()? else {
        return Ok(None);
    };
    let lvl = row
        .first()
        .and_then(Value::as_integer)
        .ok_or_else(|| Error::Internal("level seek yielded no integer".to_string()))?;
    Ok(Some(lvl))
}

/// Per-connection cache of detected level bounds, keyed by table and
/// validated against the connection's [`ChangeStamp`]: any observed
/// modification invalidates the entry.
///
/// Writes from *other* connections only surface once this connection's
/// stamp moves, so the cache may lag them by one observation.
#[derive(Debug, Default)]
pub struct DetectCache {
    map: Mutex<HashMap<String, (ChangeStamp, Option<LevelBounds>)>>,
}

impl DetectCache {
    pub fn levels<C: Connection>(&self, conn: &C, table: &str) -> Result<Option<LevelBounds>> {
        let stamp = conn.change_stamp()?;
        if let Some((cached_stamp, bounds)) = self.map.lock().get(table)
            && *cached_stamp == stamp
        {
            return Ok(*bounds);
        }

        let bounds = detect_levels(conn, table)?;
        debug!("detected level bounds {bounds:?} for {table} at {stamp:?}");
        self.map
            .lock()
            .insert(table.to_string(), (stamp, bounds));
        Ok(bounds)
    }

    pub fn clear(&self) {
        self.map.lock().clear();
    }
}
