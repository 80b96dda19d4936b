use crate::{
    Result,
    gri::{
        level::LevelBounds,
        sql::{max_level_sql, min_level_sql, overlap_sql, rid_progression_sql},
    },
};

/// The prepared statements the range-index protocol runs against a host
/// engine, as plans rather than strings.
///
/// A host binding compiles [`GriStatement::sql`]; the in-memory engine
/// interprets the plan directly. Either way the semantics are the same,
/// and the exact SQL shapes (planner quirks included) stay in one place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GriStatement {
    /// Overlap candidates for (?1 rid, ?2 qbeg, ?3 qend) over the given
    /// levels; streams `_rowid_` ascending, deduplicated.
    Overlap { table: String, bounds: LevelBounds },
    /// Distinct rids occupying the index, ascending. No parameters.
    RidProgression { table: String },
    /// Deepest stored level for rid ?1 (single seek).
    MinLevel { table: String },
    /// Shallowest stored level for rid ?1 (single seek).
    MaxLevel { table: String },
}

impl GriStatement {
    pub fn overlap(table: &str, bounds: LevelBounds) -> Self {
        Self::Overlap {
            table: table.to_string(),
            bounds,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Overlap { table, .. }
            | Self::RidProgression { table }
            | Self::MinLevel { table }
            | Self::MaxLevel { table } => table,
        }
    }

    /// Renders the statement for a SQL host engine.
    pub fn sql(&self) -> Result<String> {
        match self {
            Self::Overlap { table, bounds } => overlap_sql(table, "?1", "?2", "?3", *bounds),
            Self::RidProgression { table } => Ok(rid_progression_sql(table)),
            Self::MinLevel { table } => Ok(min_level_sql(table)),
            Self::MaxLevel { table } => Ok(max_level_sql(table)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_render_their_sql_shapes() {
        let overlap = GriStatement::overlap("t", LevelBounds::FULL);
        assert_eq!(overlap.table(), "t");
        let sql = overlap.sql().unwrap();
        assert_eq!(sql.matches("SELECT _rowid_").count(), 16);

        let rids = GriStatement::RidProgression {
            table: "t".to_string(),
        };
        assert!(rids.sql().unwrap().contains("WITH RECURSIVE"));
    }
}
