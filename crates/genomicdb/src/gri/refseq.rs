use std::fmt::Write;

use crate::{
    Error, Result,
    gri::sql::{quote_ident, quote_text},
};

/// One reference sequence to record in the `refseq` table.
#[derive(Debug, Clone, Default)]
pub struct RefSeq<'a> {
    pub name: &'a str,
    pub length: i64,
    pub assembly: Option<&'a str>,
    pub refget_id: Option<&'a str>,
    pub meta_json: Option<&'a str>,
    pub rid: Option<i64>,
}

/// DDL for the reference-sequence metadata table, idempotent.
pub fn refseq_ddl(schema: Option<&str>) -> String {
    let tbl = qualified(schema, "refseq");
    let idx = qualified(schema, "refseq_name");
    format!(
        "CREATE TABLE IF NOT EXISTS {tbl} (\n\
         rid INTEGER NOT NULL PRIMARY KEY,\n\
         name TEXT NOT NULL,\n\
         assembly TEXT,\n\
         refget_id TEXT UNIQUE,\n\
         length INTEGER NOT NULL,\n\
         meta_json TEXT NOT NULL DEFAULT '{{}}',\n\
         UNIQUE (assembly, name)\n\
         );\n\
         CREATE INDEX IF NOT EXISTS {idx} ON refseq(name)"
    )
}

/// DDL plus one INSERT for a reference sequence. A NULL rid lets the
/// engine assign the next key.
pub fn put_refseq_sql(refseq: &RefSeq<'_>, schema: Option<&str>) -> Result<String> {
    if refseq.name.is_empty() {
        return Err(Error::Schema("refseq name must not be empty".to_string()));
    }
    if refseq.length < 0 {
        return Err(Error::Schema(format!(
            "refseq length {} is negative",
            refseq.length
        )));
    }
    if let Some(meta) = refseq.meta_json {
        let value: serde_json::Value = serde_json::from_str(meta)?;
        if !value.is_object() {
            return Err(Error::Config("meta_json must be a JSON object".to_string()));
        }
    }

    let mut sql = refseq_ddl(schema);
    sql.push_str(";\n");
    write_insert(&mut sql, schema, refseq);
    Ok(sql)
}

/// DDL plus the full INSERT batch for a built-in assembly.
pub fn put_assembly_sql(assembly: &str, schema: Option<&str>) -> Result<String> {
    let units = builtin_assembly(assembly).ok_or_else(|| {
        Error::Schema(format!("no built-in assembly named '{assembly}'"))
    })?;

    let mut sql = refseq_ddl(schema);
    sql.push_str(";\n");
    for (rid, (name, length)) in units.iter().enumerate() {
        write_insert(
            &mut sql,
            schema,
            &RefSeq {
                name,
                length: *length,
                assembly: Some(assembly),
                rid: Some(rid as i64 + 1),
                ..RefSeq::default()
            },
        );
        sql.push_str(";\n");
    }
    sql.truncate(sql.trim_end_matches(";\n").len());
    Ok(sql)
}

fn write_insert(sql: &mut String, schema: Option<&str>, refseq: &RefSeq<'_>) {
    let tbl = qualified(schema, "refseq");
    write!(
        sql,
        "INSERT INTO {tbl} (rid, name, assembly, refget_id, length, meta_json) \
         VALUES ({}, {}, {}, {}, {}, {})",
        refseq.rid.map_or("NULL".to_string(), |rid| rid.to_string()),
        quote_text(refseq.name),
        refseq.assembly.map_or("NULL".to_string(), quote_text),
        refseq.refget_id.map_or("NULL".to_string(), quote_text),
        refseq.length,
        quote_text(refseq.meta_json.unwrap_or("{}")),
    )
    .expect("write to String");
}

fn qualified(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
        None => quote_ident(name),
    }
}

/// Primary assembly units of the built-in assemblies: (name, length).
fn builtin_assembly(assembly: &str) -> Option<&'static [(&'static str, i64)]> {
    match assembly {
        "GRCh38" | "GRCh38_no_alt_analysis_set" => Some(GRCH38),
        _ => None,
    }
}

const GRCH38: &[(&str, i64)] = &[
    ("chr1", 248_956_422),
    ("chr2", 242_193_529),
    ("chr3", 198_295_559),
    ("chr4", 190_214_555),
    ("chr5", 181_538_259),
    ("chr6", 170_805_979),
    ("chr7", 159_345_973),
    ("chr8", 145_138_636),
    ("chr9", 138_394_717),
    ("chr10", 133_797_422),
    ("chr11", 135_086_622),
    ("chr12", 133_275_309),
    ("chr13", 114_364_328),
    ("chr14", 107_043_718),
    ("chr15", 101_991_189),
    ("chr16", 90_338_345),
    ("chr17", 83_257_441),
    ("chr18", 80_373_285),
    ("chr19", 58_617_616),
    ("chr20", 64_444_167),
    ("chr21", 46_709_983),
    ("chr22", 50_818_468),
    ("chrX", 156_040_895),
    ("chrY", 57_227_415),
    ("chrM", 16_569),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_matches_the_metadata_schema() {
        let ddl = refseq_ddl(None);
        assert!(ddl.contains("rid INTEGER NOT NULL PRIMARY KEY"));
        assert!(ddl.contains("refget_id TEXT UNIQUE"));
        assert!(ddl.contains("meta_json TEXT NOT NULL DEFAULT '{}'"));
        assert!(ddl.contains("UNIQUE (assembly, name)"));
        assert!(ddl.contains("CREATE INDEX IF NOT EXISTS \"refseq_name\""));
    }

    #[test]
    fn put_refseq_escapes_and_defaults() {
        let sql = put_refseq_sql(
            &RefSeq {
                name: "chr'1",
                length: 1000,
                assembly: Some("GRCh38"),
                ..RefSeq::default()
            },
            None,
        )
        .unwrap();
        assert!(sql.contains("VALUES (NULL, 'chr''1', 'GRCh38', NULL, 1000, '{}')"));
    }

    #[test]
    fn put_refseq_rejects_bad_meta() {
        let refseq = RefSeq {
            name: "chr1",
            length: 10,
            meta_json: Some("[1]"),
            ..RefSeq::default()
        };
        assert!(put_refseq_sql(&refseq, None).is_err());
        assert!(
            put_refseq_sql(
                &RefSeq {
                    name: "chr1",
                    length: -5,
                    ..RefSeq::default()
                },
                None
            )
            .is_err()
        );
    }

    #[test]
    fn assembly_batch_covers_the_primary_units() {
        let sql = put_assembly_sql("GRCh38", Some("aux")).unwrap();
        assert_eq!(sql.matches("INSERT INTO \"aux\".\"refseq\"").count(), 25);
        assert!(sql.contains("VALUES (1, 'chr1', 'GRCh38', NULL, 248956422, '{}')"));
        assert!(sql.contains("'chrM'"));
        assert!(put_assembly_sql("hg17", None).is_err());
    }
}
