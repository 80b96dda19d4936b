//! Tuning & open facade: connection URIs, post-open tuning scripts, and
//! the attach / vacuum-into variants of the same.

use std::fmt::Write;

use pagedb::{Uri, VFS_NAME, resolve_threads};

use crate::{Config, Connection, Result, Session, gri::sql::quote_ident};

/// Builds the connection URI selecting the compressed-store VFS and its
/// outer-layer parameters from the configuration.
pub fn build_uri(path: &str, config: &Config) -> Result<String> {
    config.validate()?;

    let mut params: Vec<(&str, String)> = vec![
        ("vfs", VFS_NAME.to_string()),
        ("outer_page_size", (config.outer_page_kib * 1024).to_string()),
        ("level", config.zstd_level.to_string()),
        ("threads", config.threads.to_string()),
        // The outer cache is sized down from the inner page cache setting.
        (
            "outer_cache_MiB",
            (config.page_cache_mib / 16).max(8).to_string(),
        ),
    ];
    if config.immutable {
        params.push(("immutable", "1".to_string()));
    }
    if config.force_prefetch {
        params.push(("force_prefetch", "1".to_string()));
    }
    Ok(Uri::build(path, &params))
}

/// The post-open tuning script: inner page size first (it must precede any
/// page allocation), then cache size, worker threads, and journaling /
/// locking per `unsafe_load`.
///
/// The outer database's transactions carry ACID for the inner one, so the
/// inner journal only ever needs to support statement rollback: MEMORY
/// journaling and synchronous=OFF are the safe defaults here, and
/// `unsafe_load` drops the journal entirely for bulk loads.
pub fn tuning_sql(config: &Config, schema: Option<&str>) -> Result<String> {
    config.validate()?;
    let prefix = match schema {
        Some(schema) => format!("{}.", quote_ident(schema)),
        None => String::new(),
    };

    let mut sql = String::new();
    writeln!(sql, "PRAGMA {prefix}page_size={};", config.inner_page_kib * 1024).expect("write");
    writeln!(sql, "PRAGMA {prefix}cache_size=-{};", config.page_cache_mib * 1024).expect("write");
    writeln!(sql, "PRAGMA threads={};", resolve_threads(config.threads)).expect("write");
    if config.unsafe_load {
        writeln!(sql, "PRAGMA {prefix}journal_mode=OFF;").expect("write");
        writeln!(sql, "PRAGMA {prefix}synchronous=OFF;").expect("write");
        writeln!(sql, "PRAGMA {prefix}locking_mode=EXCLUSIVE;").expect("write");
    } else {
        writeln!(sql, "PRAGMA {prefix}journal_mode=MEMORY;").expect("write");
        writeln!(sql, "PRAGMA {prefix}synchronous=OFF;").expect("write");
    }
    Ok(sql)
}

/// ATTACHes a compressed database under `schema_name` on an already-open
/// connection, then applies the same tuning scoped to that schema.
pub fn attach_sql(path: &str, schema_name: &str, config: &Config) -> Result<String> {
    let uri = build_uri(path, config)?;
    Ok(format!(
        "ATTACH DATABASE '{}' AS {};\n{}",
        uri.replace('\'', "''"),
        quote_ident(schema_name),
        tuning_sql(config, Some(schema_name))?
    ))
}

/// Compacts the current database into a fresh compressed copy at
/// `dest_path` (page size must be set before the VACUUM statement).
pub fn vacuum_into_sql(dest_path: &str, config: &Config) -> Result<String> {
    let uri = build_uri(dest_path, config)?;
    Ok(format!(
        "PRAGMA page_size={};\nVACUUM INTO '{}'",
        config.inner_page_kib * 1024,
        uri.replace('\'', "''")
    ))
}

/// Opens connections to the host engine; implemented by engine bindings.
pub trait EngineOpener {
    type Conn: Connection;

    fn open(&self, uri: &str) -> Result<Self::Conn>;
}

/// The open facade: build the URI, open the engine connection through the
/// compressed VFS, apply the tuning script, and wrap the result in a
/// per-connection [`Session`].
pub fn open<O: EngineOpener>(opener: &O, path: &str, config: &Config) -> Result<Session<O::Conn>> {
    let uri = build_uri(path, config)?;
    let conn = opener.open(&uri)?;
    conn.execute_script(&tuning_sql(config, None)?)?;
    Ok(Session::new(conn))
}
