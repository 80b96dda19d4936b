use genomicdb::{
    Config, Connection, EngineOpener, Result, Uri, Value,
    engine::mem::{Feature, MemEngine},
    facade, scalar_functions,
};

/// Opener binding for the in-memory engine: records the URI it was handed
/// and yields a fresh connection.
struct MemOpener;

impl EngineOpener for MemOpener {
    type Conn = MemEngine;

    fn open(&self, uri: &str) -> Result<MemEngine> {
        let parsed = Uri::parse(uri)?;
        assert_eq!(parsed.get("vfs"), Some("compressed"));
        let engine = MemEngine::new();
        engine.execute_script(&format!("-- open {}", parsed.path().display()))?;
        Ok(engine)
    }
}

#[test]
fn open_applies_the_tuning_script() {
    let config = Config::from_json(Some(r#"{"inner_page_KiB": 32, "threads": 2}"#)).unwrap();
    let session = facade::open(&MemOpener, "/data/cohort.gdb", &config).unwrap();

    let scripts = session.connection().scripts();
    assert_eq!(scripts.len(), 2);
    assert!(scripts[0].starts_with("-- open /data/cohort.gdb"));
    assert!(scripts[1].starts_with("PRAGMA page_size=32768;"));
    assert!(scripts[1].contains("PRAGMA threads=2;"));
    assert!(scripts[1].contains("PRAGMA journal_mode=MEMORY;"));
}

#[test]
fn opened_session_runs_the_query_protocol() {
    let session = facade::open(&MemOpener, "/data/x.gdb", &Config::default()).unwrap();
    let conn = session.connection();
    conn.create_table("exons");
    session.create_gri("exons", "rid", "beg", "end", 0).unwrap();
    let rowid = conn.insert("exons", Feature::new(7, 100, 200)).unwrap();

    let rowids = session
        .overlapping_rowids("exons", Value::Integer(7), 150, 160, None)
        .unwrap()
        .collect_rowids()
        .unwrap();
    assert_eq!(rowids, vec![rowid]);
}

#[test]
fn scalar_surface_round_trips_config_json() {
    let functions = scalar_functions();
    let find = |name: &str| functions.iter().find(|f| f.name == name).unwrap();

    let defaults = find("default_config_json").call(&[]).unwrap();
    let defaults = defaults.as_text().unwrap();

    let uri = find("build_uri")
        .call(&[
            Value::Text("/data/y.gdb".into()),
            Value::Text(defaults.to_string()),
        ])
        .unwrap();
    let uri = uri.as_text().unwrap().to_string();
    assert!(uri.contains("vfs=compressed"));
    assert!(uri.contains("outer_page_size=32768"));

    let tuning = find("tuning_sql")
        .call(&[Value::Text(r#"{"unsafe_load": true}"#.into())])
        .unwrap();
    assert!(tuning.as_text().unwrap().contains("journal_mode=OFF"));

    let err = find("build_uri").call(&[
        Value::Text("/data/z.gdb".into()),
        Value::Text(r#"{"inner_page_KiB": 5}"#.into()),
    ]);
    assert!(matches!(err, Err(genomicdb::Error::Config(_))));
}

#[test]
fn attach_and_vacuum_scripts_from_the_surface() {
    let functions = scalar_functions();
    let find = |name: &str| functions.iter().find(|f| f.name == name).unwrap();

    let attach = find("attach_sql")
        .call(&[
            Value::Text("/data/panel.gdb".into()),
            Value::Text("panel".into()),
        ])
        .unwrap();
    let attach = attach.as_text().unwrap();
    assert!(attach.starts_with("ATTACH DATABASE 'file:/data/panel.gdb?"));
    assert!(attach.contains("PRAGMA \"panel\".cache_size="));

    let vacuum = find("vacuum_into_sql")
        .call(&[Value::Text("/tmp/copy.gdb".into())])
        .unwrap();
    assert!(vacuum.as_text().unwrap().contains("VACUUM INTO 'file:/tmp/copy.gdb?"));

    let refseq = find("put_refseq_sql")
        .call(&[Value::Text("chr1".into()), Value::Integer(248_956_422)])
        .unwrap();
    assert!(refseq.as_text().unwrap().contains("INSERT INTO \"refseq\""));

    let assembly = find("put_assembly_sql")
        .call(&[Value::Text("GRCh38".into())])
        .unwrap();
    assert_eq!(assembly.as_text().unwrap().matches("INSERT INTO").count(), 25);
}
