use duckdb::{params, Connection};

use crate::config::Database;

/// Open a DuckDB connection for reading and writing.  The database file is
/// created if it doesn't exist.
pub fn open(database: &Database) -> Result<Connection, duckdb::Error> {
    match database {
        Database::InMemory => Connection::open_in_memory(),
        Database::File(path) => Connection::open(path),
    }
}

/// Quote an identifier so that any column name found in a CSV header can be
/// used in SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, duckdb::Error> {
    let n: i64 = conn.query_row(
        "SELECT count(*) FROM information_schema.tables WHERE lower(table_name) = lower(?)",
        params![table],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Number of rows in the table, 0 if the table doesn't exist.
pub fn row_count(conn: &Connection, table: &str) -> Result<u64, duckdb::Error> {
    if !table_exists(conn, table)? {
        return Ok(0);
    }
    let n: i64 = conn.query_row(
        &format!("SELECT count(*) FROM {}", quote_identifier(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn quote() {
        assert_eq!(quote_identifier("vra_2024_03"), "\"vra_2024_03\"");
        assert_eq!(quote_identifier("Número Voo"), "\"Número Voo\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn count_rows() -> Result<(), Box<dyn Error>> {
        let conn = open(&Database::InMemory)?;
        assert!(!table_exists(&conn, "t")?);
        assert_eq!(row_count(&conn, "t")?, 0);
        conn.execute_batch("CREATE TABLE t (a VARCHAR); INSERT INTO t VALUES ('x'), ('y');")?;
        assert!(table_exists(&conn, "t")?);
        assert_eq!(row_count(&conn, "t")?, 2);
        assert!(table_exists(&conn, "T")?);
        assert_eq!(row_count(&conn, "T")?, 2);
        Ok(())
    }
}
