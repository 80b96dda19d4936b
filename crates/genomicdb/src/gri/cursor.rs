use crate::{
    Connection, Error, Result, Rowid, Session, Statement,
    gri::level::LevelBounds,
};

/// How often a streaming cursor polls the caller's interrupt flag.
const INTERRUPT_STRIDE: u64 = 256;

/// Streaming cursor over the rowids of features overlapping a query
/// range: the `overlapping_rowids` table-valued function.
///
/// The underlying statement comes from the session's per-table pool and
/// goes back on EOF or drop, so a join probing once per outer row pays no
/// per-probe compilation cost after warmup.
pub struct RowidCursor<'s, C: Connection> {
    session: &'s Session<C>,
    table: String,
    bounds: LevelBounds,
    stmt: Option<C::Stmt>,
    steps: u64,
    done: bool,
}

impl<'s, C: Connection> RowidCursor<'s, C> {
    pub(crate) fn new(
        session: &'s Session<C>,
        table: String,
        bounds: LevelBounds,
        stmt: C::Stmt,
    ) -> Self {
        Self {
            session,
            table,
            bounds,
            stmt: Some(stmt),
            steps: 0,
            done: false,
        }
    }

    /// A cursor that is already at EOF (empty table, nothing to scan).
    pub(crate) fn empty(session: &'s Session<C>, table: String) -> Self {
        Self {
            session,
            table,
            bounds: LevelBounds::FULL,
            stmt: None,
            steps: 0,
            done: true,
        }
    }

    /// The next matching rowid, ascending, without duplicates.
    pub fn next_rowid(&mut self) -> Result<Option<Rowid>> {
        if self.done {
            return Ok(None);
        }
        self.steps += 1;
        if self.steps % INTERRUPT_STRIDE == 0 && self.session.connection().interrupted() {
            self.done = true;
            self.release();
            return Err(Error::Cancelled);
        }

        let stmt = self
            .stmt
            .as_mut()
            .ok_or_else(|| Error::Internal("stepping a cursor without a statement".to_string()))?;
        match stmt.step()? {
            Some(row) => row
                .first()
                .and_then(|v| v.as_integer())
                .map(Some)
                .ok_or_else(|| Error::Internal("overlap scan yielded no rowid".to_string())),
            None => {
                self.done = true;
                self.release();
                Ok(None)
            }
        }
    }

    /// Drains the cursor into a vector.
    pub fn collect_rowids(mut self) -> Result<Vec<Rowid>> {
        let mut rowids = Vec::new();
        while let Some(rowid) = self.next_rowid()? {
            rowids.push(rowid);
        }
        Ok(rowids)
    }

    fn release(&mut self) {
        if let Some(mut stmt) = self.stmt.take() {
            if stmt.reset().is_ok() {
                self.session.recycle(&self.table, self.bounds, stmt);
            }
        }
    }
}

impl<C: Connection> Drop for RowidCursor<'_, C> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<C: Connection> Iterator for RowidCursor<'_, C> {
    type Item = Result<Rowid>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_rowid().transpose()
    }
}
