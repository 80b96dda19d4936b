//! The caller-facing SQL function surface, as registry entries a host
//! binding installs on each connection.

use crate::{
    Config, Error, Result, ScalarFunction, TableFunction, Value, facade,
    gri::{
        level::{LevelBounds, MAX_LEVEL},
        refseq::{RefSeq, put_assembly_sql, put_refseq_sql},
        sql,
    },
};

/// Crate version, as `version()` reports it.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn arg_text<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str> {
    args[index]
        .as_text()
        .ok_or_else(|| Error::Engine(format!("argument '{name}' must be TEXT")))
}

fn arg_text_opt<'a>(args: &'a [Value], index: usize, name: &str) -> Result<Option<&'a str>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg_text(args, index, name).map(Some),
    }
}

fn arg_int(args: &[Value], index: usize, name: &str) -> Result<i64> {
    args[index]
        .as_integer()
        .ok_or_else(|| Error::Engine(format!("argument '{name}' must be INTEGER")))
}

fn arg_int_opt(args: &[Value], index: usize, name: &str) -> Result<Option<i64>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg_int(args, index, name).map(Some),
    }
}

/// An integer argument is spliced as a literal; text passes through as an
/// SQL expression (e.g. a column reference for join-driven queries).
fn arg_expr(args: &[Value], index: usize, default: &str) -> Result<String> {
    Ok(match args.get(index) {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::Integer(v)) => v.to_string(),
        Some(Value::Text(expr)) => expr.clone(),
        Some(Value::Real(_)) => {
            return Err(Error::Engine(
                "range bounds must be INTEGER or TEXT expressions".to_string(),
            ));
        }
    })
}

fn config_from(args: &[Value], index: usize) -> Result<Config> {
    Config::from_json(arg_text_opt(args, index, "config_json")?)
}

fn version_fn(_args: &[Value]) -> Result<Value> {
    Ok(Value::Text(version().to_string()))
}

fn default_config_json_fn(_args: &[Value]) -> Result<Value> {
    Ok(Value::Text(Config::default_json()))
}

fn build_uri_fn(args: &[Value]) -> Result<Value> {
    let path = arg_text(args, 0, "path")?;
    let config = config_from(args, 1)?;
    facade::build_uri(path, &config).map(Value::Text)
}

fn tuning_sql_fn(args: &[Value]) -> Result<Value> {
    let config = config_from(args, 0)?;
    let schema = arg_text_opt(args, 1, "schema")?;
    facade::tuning_sql(&config, schema).map(Value::Text)
}

fn attach_sql_fn(args: &[Value]) -> Result<Value> {
    let path = arg_text(args, 0, "path")?;
    let schema = arg_text(args, 1, "schema_name")?;
    let config = config_from(args, 2)?;
    facade::attach_sql(path, schema, &config).map(Value::Text)
}

fn vacuum_into_sql_fn(args: &[Value]) -> Result<Value> {
    let dest = arg_text(args, 0, "dest_path")?;
    let config = config_from(args, 1)?;
    facade::vacuum_into_sql(dest, &config).map(Value::Text)
}

fn create_gri_sql_fn(args: &[Value]) -> Result<Value> {
    let table = arg_text(args, 0, "table")?;
    let rid = arg_text(args, 1, "rid_expr")?;
    let beg = arg_text(args, 2, "beg_expr")?;
    let end = arg_text(args, 3, "end_expr")?;
    let floor = arg_int_opt(args, 4, "floor")?.unwrap_or(0);
    if !(0..=MAX_LEVEL as i64).contains(&floor) {
        return Err(Error::QueryPlan(format!("floor {floor} out of range")));
    }
    sql::create_gri_sql(table, rid, beg, end, floor as u8).map(Value::Text)
}

fn overlap_sql_fn(args: &[Value]) -> Result<Value> {
    let table = arg_text(args, 0, "table")?;
    let qrid = arg_expr(args, 1, "?1")?;
    let qbeg = arg_expr(args, 2, "?2")?;
    let qend = arg_expr(args, 3, "?3")?;
    let ceiling = arg_int_opt(args, 4, "ceiling")?.unwrap_or(MAX_LEVEL as i64);
    let floor = arg_int_opt(args, 5, "floor")?.unwrap_or(0);
    let bounds = LevelBounds::new(ceiling, floor)?;
    sql::overlap_sql(table, &qrid, &qbeg, &qend, bounds).map(Value::Text)
}

fn put_refseq_sql_fn(args: &[Value]) -> Result<Value> {
    let refseq = RefSeq {
        name: arg_text(args, 0, "name")?,
        length: arg_int(args, 1, "length")?,
        assembly: arg_text_opt(args, 2, "assembly")?,
        refget_id: arg_text_opt(args, 3, "refget_id")?,
        meta_json: arg_text_opt(args, 4, "meta_json")?,
        rid: arg_int_opt(args, 5, "rid")?,
    };
    put_refseq_sql(&refseq, None).map(Value::Text)
}

fn put_assembly_sql_fn(args: &[Value]) -> Result<Value> {
    let assembly = arg_text(args, 0, "name")?;
    let schema = arg_text_opt(args, 1, "schema")?;
    put_assembly_sql(assembly, schema).map(Value::Text)
}

/// Every scalar function of the SQL surface, ready for registration.
pub fn scalar_functions() -> Vec<ScalarFunction> {
    vec![
        ScalarFunction {
            name: "version",
            min_args: 0,
            max_args: 0,
            func: version_fn,
        },
        ScalarFunction {
            name: "default_config_json",
            min_args: 0,
            max_args: 0,
            func: default_config_json_fn,
        },
        ScalarFunction {
            name: "build_uri",
            min_args: 1,
            max_args: 2,
            func: build_uri_fn,
        },
        ScalarFunction {
            name: "tuning_sql",
            min_args: 0,
            max_args: 2,
            func: tuning_sql_fn,
        },
        ScalarFunction {
            name: "attach_sql",
            min_args: 2,
            max_args: 3,
            func: attach_sql_fn,
        },
        ScalarFunction {
            name: "vacuum_into_sql",
            min_args: 1,
            max_args: 2,
            func: vacuum_into_sql_fn,
        },
        ScalarFunction {
            name: "create_gri_sql",
            min_args: 4,
            max_args: 5,
            func: create_gri_sql_fn,
        },
        ScalarFunction {
            name: "overlap_sql",
            min_args: 1,
            max_args: 6,
            func: overlap_sql_fn,
        },
        ScalarFunction {
            name: "put_refseq_sql",
            min_args: 2,
            max_args: 6,
            func: put_refseq_sql_fn,
        },
        ScalarFunction {
            name: "put_assembly_sql",
            min_args: 1,
            max_args: 2,
            func: put_assembly_sql_fn,
        },
    ]
}

/// The table-valued functions of the SQL surface.
pub fn table_functions() -> Vec<TableFunction> {
    vec![
        TableFunction {
            name: "overlapping_rowids",
            columns: &["_rowid_"],
            hidden_args: &["table", "qrid", "qbeg", "qend", "ceiling", "floor"],
        },
        TableFunction {
            name: "gri_levels",
            columns: &["_gri_ceiling", "_gri_floor"],
            hidden_args: &["table"],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value> {
        scalar_functions()
            .into_iter()
            .find(|f| f.name == name)
            .unwrap()
            .call(args)
    }

    #[test]
    fn version_is_the_crate_version() {
        let v = call("version", &[]).unwrap();
        assert_eq!(v.as_text(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn arity_is_enforced() {
        assert!(matches!(
            call("build_uri", &[]),
            Err(Error::Engine(_))
        ));
        assert!(matches!(
            call("version", &[Value::Integer(1)]),
            Err(Error::Engine(_))
        ));
    }

    #[test]
    fn overlap_sql_defaults_to_parameters() {
        let sql = call("overlap_sql", std::slice::from_ref(&Value::Text("t".into()))).unwrap();
        let sql = sql.as_text().unwrap();
        assert!(sql.contains("(?1)"));
        assert!(sql.contains("(?2) - 1"));
        assert_eq!(sql.matches("SELECT _rowid_").count(), 16);
    }

    #[test]
    fn overlap_sql_accepts_join_expressions() {
        let args = [
            Value::Text("exons".into()),
            Value::Text("V.chrom".into()),
            Value::Integer(1000),
            Value::Text("V.pos + 1".into()),
            Value::Integer(3),
            Value::Integer(1),
        ];
        let sql = call("overlap_sql", &args).unwrap();
        let sql = sql.as_text().unwrap();
        assert!(sql.contains("(V.chrom)"));
        assert!(sql.contains("(1000) - 4096"));
        assert!(sql.contains("(V.pos + 1) - 0"));
        assert_eq!(sql.matches("SELECT _rowid_").count(), 3);
    }

    #[test]
    fn bad_bounds_are_query_plan_errors() {
        let args = [
            Value::Text("t".into()),
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Integer(1),
            Value::Integer(5),
        ];
        assert!(matches!(
            call("overlap_sql", &args),
            Err(Error::QueryPlan(_))
        ));
    }

    #[test]
    fn table_function_shapes() {
        let tvfs = table_functions();
        assert_eq!(tvfs[0].name, "overlapping_rowids");
        assert_eq!(tvfs[0].columns, &["_rowid_"]);
        assert_eq!(tvfs[0].hidden_args.len(), 6);
        assert_eq!(tvfs[1].columns, &["_gri_ceiling", "_gri_floor"]);
    }
}
