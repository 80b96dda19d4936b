use std::fmt::Write;

use crate::{
    Error, Result,
    gri::level::{LevelBounds, MAX_LEVEL, POW16},
};

/// Derived columns a range index adds to its table.
pub const GRI_COLUMNS: [&str; 4] = ["_gri_rid", "_gri_beg", "_gri_len", "_gri_lvl"];

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes an SQL text literal, doubling embedded quotes.
pub fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn index_name(table: &str) -> String {
    format!("{table}__gri")
}

/// DDL adding a genomic range index to `table`: four virtual generated
/// columns computed from the caller's (chrom, begin, end) expressions,
/// then a B-tree index over (rid, lvl, beg, len).
///
/// The engine maintains the columns and index itself under every insert,
/// update and delete, because they are pure functions of the row.
pub fn create_gri_sql(
    table: &str,
    rid_expr: &str,
    beg_expr: &str,
    end_expr: &str,
    floor: u8,
) -> Result<String> {
    if floor > MAX_LEVEL {
        return Err(Error::QueryPlan(format!(
            "floor {floor} out of range 0..={MAX_LEVEL}"
        )));
    }
    let tbl = quote_ident(table);

    let mut ladder = String::from("CASE WHEN (_gri_len) IS NULL OR (_gri_len) < 0 THEN NULL");
    for level in floor..=MAX_LEVEL {
        write!(
            ladder,
            " WHEN (_gri_len) <= {} THEN {}",
            POW16[level as usize],
            -(level as i32)
        )
        .expect("write to String");
    }
    ladder.push_str(" ELSE NULL END");

    Ok(format!(
        "ALTER TABLE {tbl} ADD COLUMN _gri_rid INTEGER AS ({rid_expr}) VIRTUAL;\n\
         ALTER TABLE {tbl} ADD COLUMN _gri_beg INTEGER AS ({beg_expr}) VIRTUAL;\n\
         ALTER TABLE {tbl} ADD COLUMN _gri_len INTEGER AS (({end_expr}) - ({beg_expr})) VIRTUAL;\n\
         ALTER TABLE {tbl} ADD COLUMN _gri_lvl INTEGER AS ({ladder}) VIRTUAL;\n\
         CREATE INDEX {} ON {tbl}(_gri_rid, _gri_lvl, _gri_beg, _gri_len)",
        quote_ident(&index_name(table))
    ))
}

/// The overlap subquery: one index range scan per level in `bounds`,
/// deduplicated and ordered by rowid.
///
/// `qrid`, `qbeg` and `qend` are SQL expressions (bound parameters by
/// default). A feature at level L is at most 16^L long, so its begin must
/// lie in [qbeg - 16^L, qend]; the trailing predicate drops the in-range
/// minority that still ends before the query.
///
/// The upper BETWEEN bound is written `(qend) - 0`: handing the planner a
/// bare parameter there makes some engines mis-cost the scan, and the
/// arithmetic no-op keeps the intended index plan without changing the
/// result.
pub fn overlap_sql(
    table: &str,
    qrid: &str,
    qbeg: &str,
    qend: &str,
    bounds: LevelBounds,
) -> Result<String> {
    let tbl = quote_ident(table);
    let mut sql = String::new();

    for (i, level) in bounds.levels().enumerate() {
        if i > 0 {
            sql.push_str("\n UNION \n");
        }
        write!(
            sql,
            "SELECT _rowid_ FROM {tbl} WHERE \
             (_gri_rid, _gri_lvl, _gri_beg) \
             BETWEEN (({qrid}), {lvl}, ({qbeg}) - {reach}) \
             AND (({qrid}), {lvl}, ({qend}) - 0) \
             AND (_gri_beg + _gri_len) >= ({qbeg})",
            lvl = -(level as i32),
            reach = POW16[level as usize],
        )
        .expect("write to String");
    }
    sql.push_str("\nORDER BY 1");
    Ok(sql)
}

/// Streams the distinct rids occupying the index, in ascending order.
///
/// Written as a recursive seek progression rather than DISTINCT or an
/// aggregate: each step is one index seek for the next-larger rid, which
/// is the plan engines will not otherwise choose.
pub fn rid_progression_sql(table: &str) -> String {
    let tbl = quote_ident(table);
    format!(
        "WITH RECURSIVE rids(rid) AS (\n\
         SELECT MIN(_gri_rid) FROM {tbl}\n\
         UNION ALL\n\
         SELECT (SELECT MIN(_gri_rid) FROM {tbl} WHERE _gri_rid > rids.rid) FROM rids WHERE rids.rid IS NOT NULL\n\
         )\n\
         SELECT rid FROM rids WHERE rid IS NOT NULL"
    )
}

/// Deepest stored level for one rid: a single index seek.
pub fn min_level_sql(table: &str) -> String {
    let tbl = quote_ident(table);
    format!(
        "SELECT _gri_lvl FROM {tbl} WHERE _gri_rid = ?1 AND _gri_lvl IS NOT NULL \
         ORDER BY _gri_rid, _gri_lvl LIMIT 1"
    )
}

/// Shallowest stored level for one rid: the DESC counterpart.
pub fn max_level_sql(table: &str) -> String {
    let tbl = quote_ident(table);
    format!(
        "SELECT _gri_lvl FROM {tbl} WHERE _gri_rid = ?1 AND _gri_lvl IS NOT NULL \
         ORDER BY _gri_rid DESC, _gri_lvl DESC LIMIT 1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sql_carries_the_full_ladder() {
        let sql = create_gri_sql("features", "chrom", "pos", "pos + span", 0).unwrap();
        assert!(sql.contains("ADD COLUMN _gri_rid INTEGER AS (chrom) VIRTUAL"));
        assert!(sql.contains("((pos + span) - (pos))"));
        assert!(sql.contains("WHEN (_gri_len) <= 1 THEN 0"));
        assert!(sql.contains("WHEN (_gri_len) <= 16 THEN -1"));
        assert!(sql.contains("WHEN (_gri_len) <= 1152921504606846976 THEN -15"));
        assert!(sql.contains("ELSE NULL END"));
        assert!(sql.contains(
            "CREATE INDEX \"features__gri\" ON \"features\"(_gri_rid, _gri_lvl, _gri_beg, _gri_len)"
        ));
    }

    #[test]
    fn create_sql_floor_trims_shallow_rungs() {
        let sql = create_gri_sql("t", "rid", "beg", "end", 2).unwrap();
        assert!(!sql.contains("THEN 0 "));
        assert!(!sql.contains("THEN -1 "));
        assert!(sql.contains("WHEN (_gri_len) <= 256 THEN -2"));
        assert!(create_gri_sql("t", "rid", "beg", "end", 16).is_err());
    }

    #[test]
    fn overlap_sql_shape_is_planner_safe() {
        let sql = overlap_sql("t", "?1", "?2", "?3", LevelBounds::new(2, 0).unwrap()).unwrap();
        // One arm per level, deepest first.
        assert_eq!(sql.matches("SELECT _rowid_").count(), 3);
        assert_eq!(sql.matches(" UNION ").count(), 2);
        // The quirk: never a bare parameter as the upper bound.
        assert_eq!(sql.matches("(?3) - 0").count(), 3);
        assert!(sql.contains("BETWEEN ((?1), -2, (?2) - 256)"));
        assert!(sql.contains("BETWEEN ((?1), -1, (?2) - 16)"));
        assert!(sql.contains("BETWEEN ((?1), 0, (?2) - 1)"));
        assert!(sql.contains("(_gri_beg + _gri_len) >= (?2)"));
        assert!(sql.ends_with("ORDER BY 1"));
    }

    #[test]
    fn detection_sql_shapes() {
        let sql = rid_progression_sql("exons");
        assert!(sql.contains("WITH RECURSIVE"));
        assert!(sql.contains("_gri_rid > rids.rid"));

        assert!(min_level_sql("exons").contains("ORDER BY _gri_rid, _gri_lvl LIMIT 1"));
        assert!(max_level_sql("exons").contains("ORDER BY _gri_rid DESC, _gri_lvl DESC LIMIT 1"));
    }

    #[test]
    fn identifiers_and_literals_quote_safely() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_text("it's"), "'it''s'");
    }
}
