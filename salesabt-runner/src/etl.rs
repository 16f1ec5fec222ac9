//! ABT materialisation.
//!
//! For every monthly snapshot between the configured bounds the SQL template is
//! rendered with `{data_ref}` set to the snapshot date and executed against the
//! SQLite database. The template is expected to (re)build the source view; the
//! view is then copied into the ABT table tagged with the snapshot date. The
//! first snapshot recreates the table, later ones append. Each snapshot runs in
//! its own transaction.

use chrono::{Months, NaiveDate};
use rusqlite::Connection;
use salesabt_core::AbtSchema;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::config::RunConfig;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("failed to read SQL template {path}: {source}")]
    ReadTemplate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("SQL template has unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("SQL template has an unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),

    #[error("first snapshot {first} is after last snapshot {last}")]
    EmptyRange { first: NaiveDate, last: NaiveDate },

    #[error("snapshot date overflow after {0}")]
    DateOverflow(NaiveDate),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Rows written per snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EtlSummary {
    pub table: String,
    pub snapshots: Vec<(NaiveDate, usize)>,
}

impl EtlSummary {
    pub fn total_rows(&self) -> usize {
        self.snapshots.iter().map(|(_, n)| n).sum()
    }
}

/// Month starts from `first` to `last`, both inclusive.
pub fn monthly_snapshots(first: NaiveDate, last: NaiveDate) -> Result<Vec<NaiveDate>, EtlError> {
    if first > last {
        return Err(EtlError::EmptyRange { first, last });
    }
    let mut out = Vec::new();
    let mut current = first;
    while current <= last {
        out.push(current);
        current = current
            .checked_add_months(Months::new(1))
            .ok_or(EtlError::DateOverflow(current))?;
    }
    Ok(out)
}

/// Substitute `{data_ref}` and unescape `{{` / `}}`.
pub fn render_template(template: &str, snapshot: NaiveDate) -> Result<String, EtlError> {
    let date = snapshot.format("%Y-%m-%d").to_string();
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, nc) in chars.by_ref() {
                    if nc == '}' {
                        closed = true;
                        break;
                    }
                    name.push(nc);
                }
                if !closed {
                    return Err(EtlError::UnbalancedBrace(pos));
                }
                if name != "data_ref" {
                    return Err(EtlError::UnknownPlaceholder(name));
                }
                out.push_str(&date);
            }
            '}' => return Err(EtlError::UnbalancedBrace(pos)),
            other => out.push(other),
        }
    }
    Ok(out)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Statement copying the source view into the ABT for one snapshot.
fn materialise_sql(schema: &AbtSchema, snapshot: NaiveDate, first: bool) -> String {
    let table = quote_ident(&schema.table);
    let view = quote_ident(&schema.source_view);
    let column = quote_ident(&schema.snapshot);
    let date = snapshot.format("%Y-%m-%d");
    if first {
        format!(
            "DROP TABLE IF EXISTS {table};\n\
             CREATE TABLE {table} AS SELECT '{date}' AS {column}, * FROM {view};"
        )
    } else {
        format!("INSERT INTO {table} SELECT '{date}' AS {column}, * FROM {view};")
    }
}

/// Materialise the ABT for every snapshot.
pub fn build_abt(
    conn: &mut Connection,
    template: &str,
    snapshots: &[NaiveDate],
    schema: &AbtSchema,
) -> Result<EtlSummary, EtlError> {
    let mut summary = EtlSummary {
        table: schema.table.clone(),
        snapshots: Vec::with_capacity(snapshots.len()),
    };
    for (i, &snapshot) in snapshots.iter().enumerate() {
        let mut script = render_template(template, snapshot)?;
        if !script.trim_end().ends_with(';') && !script.trim().is_empty() {
            script.push(';');
        }
        script.push('\n');
        script.push_str(&materialise_sql(schema, snapshot, i == 0));

        let tx = conn.transaction()?;
        tx.execute_batch(&script)?;
        let rows: i64 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                quote_ident(&schema.table),
                quote_ident(&schema.snapshot)
            ),
            [snapshot.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        tx.commit()?;

        info!(snapshot = %snapshot, rows, "materialised ABT snapshot");
        summary.snapshots.push((snapshot, rows.max(0) as usize));
    }
    Ok(summary)
}

/// Read the template and materialise the configured snapshot range.
pub fn run_etl(config: &RunConfig, schema: &AbtSchema) -> Result<EtlSummary, EtlError> {
    let template = read_template(&config.query_path)?;
    let snapshots = monthly_snapshots(config.first_snapshot, config.last_snapshot)?;
    let mut conn = Connection::open(&config.data_path)?;
    info!(
        database = %config.data_path.display(),
        snapshots = snapshots.len(),
        "building ABT"
    );
    build_abt(&mut conn, &template, &snapshots, schema)
}

fn read_template(path: &Path) -> Result<String, EtlError> {
    std::fs::read_to_string(path).map_err(|source| EtlError::ReadTemplate {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn monthly_range_is_inclusive() {
        let months = monthly_snapshots(d(2017, 11), d(2018, 2)).unwrap();
        assert_eq!(months, vec![d(2017, 11), d(2017, 12), d(2018, 1), d(2018, 2)]);
        assert_eq!(monthly_snapshots(d(2018, 5), d(2018, 5)).unwrap(), vec![d(2018, 5)]);
    }

    #[test]
    fn reversed_range_rejected() {
        assert!(matches!(
            monthly_snapshots(d(2018, 5), d(2018, 4)),
            Err(EtlError::EmptyRange { .. })
        ));
    }

    #[test]
    fn template_substitution() {
        let sql = "SELECT * FROM t WHERE dt < '{data_ref}' AND j = '{{x}}'";
        assert_eq!(
            render_template(sql, d(2018, 5)).unwrap(),
            "SELECT * FROM t WHERE dt < '2018-05-01' AND j = '{x}'"
        );
    }

    #[test]
    fn template_errors() {
        assert!(matches!(
            render_template("{other}", d(2018, 5)),
            Err(EtlError::UnknownPlaceholder(p)) if p == "other"
        ));
        assert!(matches!(
            render_template("SELECT {data_ref", d(2018, 5)),
            Err(EtlError::UnbalancedBrace(7))
        ));
        assert!(matches!(
            render_template("a } b", d(2018, 5)),
            Err(EtlError::UnbalancedBrace(2))
        ));
    }

    #[test]
    fn every_snapshot_is_materialised() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE sellers (seller_id TEXT, created TEXT, qtd_pedidos INTEGER);
             INSERT INTO sellers VALUES ('a', '2018-01-15', 3), ('b', '2018-02-10', 5), ('c', '2018-03-02', NULL);",
        )
        .unwrap();
        let template = "DROP VIEW IF EXISTS vw_olist_abt_p2;
            CREATE VIEW vw_olist_abt_p2 AS
            SELECT seller_id, qtd_pedidos FROM sellers WHERE created < '{data_ref}';";
        let schema = AbtSchema::default();
        let snaps = monthly_snapshots(d(2018, 2), d(2018, 4)).unwrap();

        let summary = build_abt(&mut conn, template, &snaps, &schema).unwrap();
        assert_eq!(
            summary.snapshots,
            vec![(d(2018, 2), 1), (d(2018, 3), 2), (d(2018, 4), 3)]
        );
        assert_eq!(summary.total_rows(), 6);

        let first_col: String = conn
            .query_row("SELECT name FROM pragma_table_info('TB_ABT') WHERE cid = 0", [], |r| r.get(0))
            .unwrap();
        assert_eq!(first_col, "dt_ref");
    }

    #[test]
    fn rerun_recreates_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE src (v INTEGER); INSERT INTO src VALUES (1), (2);
             CREATE VIEW vw_olist_abt_p2 AS SELECT v FROM src;",
        )
        .unwrap();
        let schema = AbtSchema::default();
        let snaps = vec![d(2018, 1)];
        build_abt(&mut conn, "", &snaps, &schema).unwrap();
        build_abt(&mut conn, "", &snaps, &schema).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM TB_ABT", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn failed_snapshot_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE src (v INTEGER); CREATE VIEW vw_olist_abt_p2 AS SELECT v FROM src;")
            .unwrap();
        let schema = AbtSchema::default();
        let err = build_abt(&mut conn, "INSERT INTO src VALUES (1); SELECT nope FROM missing", &[d(2018, 1)], &schema);
        assert!(matches!(err, Err(EtlError::Sqlite(_))));
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM src", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 0);
    }
}
