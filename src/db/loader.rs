use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use csv::{StringRecord, StringRecordsIntoIter};
use duckdb::{appender_params_from_iter, Connection};
use log::{info, warn};
use regex::Regex;

use crate::error::{FilesystemError, LoadError};
use crate::utils::lib_duckdb::{quote_identifier, row_count};

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// What happens to the destination table on the first batch of a load.
/// Later batches always append.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop and recreate the table.  Loading the same file twice leaves a
    /// single copy of the rows.
    Replace,
    /// Create the table if missing, then add rows to it.  There is no
    /// dedup key: loading the same file twice stores every row twice.
    #[default]
    Append,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Replace => write!(f, "replace"),
            WriteMode::Append => write!(f, "append"),
        }
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(WriteMode::Replace),
            "append" => Ok(WriteMode::Append),
            _ => Err(format!("unknown write mode {:?}, use replace or append", s)),
        }
    }
}

/// Semantic type of a destination column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColumnType {
    #[default]
    Text,
    Integer,
    BigInt,
    Double,
    Boolean,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "VARCHAR",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "varchar" | "string" => Ok(ColumnType::Text),
            "integer" | "int" => Ok(ColumnType::Integer),
            "bigint" => Ok(ColumnType::BigInt),
            "double" | "float" => Ok(ColumnType::Double),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "timestamp" => Ok(ColumnType::Timestamp),
            _ => Err(format!("unknown column type {:?}", s)),
        }
    }
}

/// Column name -> type overrides.  Columns not in the map are text.
pub type ColumnTypes = HashMap<String, ColumnType>;

/// Parse one override, e.g. `Número Voo=integer`.
pub fn parse_column_type(s: &str) -> Result<(String, ColumnType), String> {
    let (name, kind) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected name=type, got {:?}", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty column name in {:?}", s));
    }
    Ok((name.to_string(), kind.parse()?))
}

/// Parse a `;` separated list of overrides, e.g. `a=integer;b=double`.
pub fn parse_column_types(s: &str) -> Result<ColumnTypes, String> {
    s.split(';')
        .filter(|e| !e.trim().is_empty())
        .map(parse_column_type)
        .collect()
}

#[derive(Clone, Debug)]
pub struct LoadOptions {
    pub chunk_size: usize,
    pub mode: WriteMode,
    pub delimiter: u8,
    pub column_types: ColumnTypes,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            mode: WriteMode::Append,
            delimiter: b',',
            column_types: ColumnTypes::new(),
        }
    }
}

/// A window of consecutive CSV rows.  `index` starts at 1.
#[derive(Debug)]
pub struct Batch {
    pub index: usize,
    pub rows: Vec<StringRecord>,
}

/// Lazily split the records of a CSV reader into batches of `chunk_size`
/// rows, the last one possibly shorter.  Iteration stops after the first
/// read error.
pub struct CsvBatches<R> {
    records: StringRecordsIntoIter<R>,
    chunk_size: usize,
    next_index: usize,
    done: bool,
}

impl<R: Read> CsvBatches<R> {
    pub fn new(reader: csv::Reader<R>, chunk_size: usize) -> CsvBatches<R> {
        CsvBatches {
            records: reader.into_records(),
            chunk_size,
            next_index: 1,
            done: chunk_size == 0,
        }
    }
}

impl<R: Read> Iterator for CsvBatches<R> {
    type Item = Result<Batch, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut rows = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE));
        while rows.len() < self.chunk_size {
            match self.records.next() {
                Some(Ok(record)) => rows.push(record),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if rows.is_empty() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(Ok(Batch { index, rows }))
    }
}

/// Destination columns, in header order.
struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    /// Blank names become `unnamed_<i>`.  DuckDB identifiers are case
    /// insensitive, so a name already taken in any case gets a `_1`, `_2`, ...
    /// suffix.  Overrides apply to the final names.
    fn new(header: &StringRecord, column_types: &ColumnTypes) -> Schema {
        let mut taken: HashSet<String> = HashSet::new();
        let mut columns: Vec<(String, ColumnType)> = Vec::with_capacity(header.len());
        for (i, name) in header.iter().enumerate() {
            let base = match name.trim() {
                "" => format!("unnamed_{}", i),
                s => s.to_string(),
            };
            let mut name = base.clone();
            let mut k = 1;
            while taken.contains(&name.to_lowercase()) {
                name = format!("{}_{}", base, k);
                k += 1;
            }
            taken.insert(name.to_lowercase());
            let kind = column_types.get(&name).copied().unwrap_or_default();
            columns.push((name, kind));
        }
        for name in column_types.keys() {
            if !columns.iter().any(|(c, _)| c == name) {
                warn!("column type override for {:?} matches no column in the file", name);
            }
        }
        Schema { columns }
    }

    fn definitions(&self) -> String {
        self.columns
            .iter()
            .map(|(name, kind)| format!("{} {}", quote_identifier(name), kind.sql_type()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn staging_definitions(&self) -> String {
        self.columns
            .iter()
            .map(|(name, _)| format!("{} VARCHAR", quote_identifier(name)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn names(&self) -> String {
        self.columns
            .iter()
            .map(|(name, _)| quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn casts(&self) -> String {
        self.columns
            .iter()
            .map(|(name, kind)| match kind {
                ColumnType::Text => quote_identifier(name),
                _ => format!("CAST({} AS {})", quote_identifier(name), kind.sql_type()),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn table_ddl(table: &str, schema: &Schema, mode: WriteMode) -> String {
    let target = quote_identifier(table);
    match mode {
        WriteMode::Replace => format!(
            "DROP TABLE IF EXISTS {target};\nCREATE TABLE {target} ({});",
            schema.definitions()
        ),
        WriteMode::Append => format!(
            "CREATE TABLE IF NOT EXISTS {target} ({});",
            schema.definitions()
        ),
    }
}

/// Drop and recreate `table` without rows.
fn recreate_table(conn: &mut Connection, table: &str, schema: &Schema) -> Result<(), duckdb::Error> {
    let tx = conn.transaction()?;
    tx.execute_batch(&table_ddl(table, schema, WriteMode::Replace))?;
    tx.commit()
}

/// Write one batch in its own transaction.  Rows go through an all-text
/// staging table so that type overrides are applied with an explicit CAST.
fn write_batch(
    conn: &mut Connection,
    table: &str,
    schema: &Schema,
    batch: &Batch,
    mode: WriteMode,
) -> Result<usize, duckdb::Error> {
    let target = quote_identifier(table);
    let staging_name = format!("__staging_{}", table);
    let staging = quote_identifier(&staging_name);

    let tx = conn.transaction()?;
    tx.execute_batch(&table_ddl(table, schema, mode))?;
    tx.execute_batch(&format!(
        "CREATE TABLE {staging} ({});",
        schema.staging_definitions()
    ))?;
    {
        let mut appender = tx.appender(&staging_name)?;
        for row in &batch.rows {
            appender.append_row(appender_params_from_iter(
                row.iter().map(|v| if v.is_empty() { None } else { Some(v) }),
            ))?;
        }
        appender.flush()?;
    }
    let n = tx.execute(
        &format!(
            "INSERT INTO {target} ({}) SELECT {} FROM {staging};",
            schema.names(),
            schema.casts()
        ),
        [],
    )?;
    tx.execute_batch(&format!("DROP TABLE {staging};"))?;
    tx.commit()?;
    Ok(n)
}

/// Stream a CSV file with a header row into `table`, `options.chunk_size`
/// rows at a time.  Returns the number of rows committed.
///
/// The first batch applies `options.mode`, every later batch appends.  An
/// error on batch k returns immediately: batches before k stay committed,
/// batch k is rolled back and the rest of the file is not read.
///
/// A file without data rows appends nothing; in replace mode the table is
/// still recreated, empty.
pub fn load(
    conn: &mut Connection,
    path: &Path,
    table: &str,
    options: &LoadOptions,
) -> Result<u64, LoadError> {
    if options.chunk_size == 0 {
        return Err(LoadError::InvalidChunkSize);
    }
    let file = File::open(path).map_err(|source| FilesystemError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .from_reader(file);
    let header = rdr
        .headers()
        .map_err(|source| LoadError::Header {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    if header.is_empty() {
        return Err(LoadError::MissingHeader {
            path: path.to_path_buf(),
        });
    }
    let schema = Schema::new(&header, &options.column_types);

    if options.mode == WriteMode::Append {
        match row_count(conn, table) {
            Ok(n) if n > 0 => warn!(
                "appending to table {} which already has {} rows, rows loaded before will be duplicated",
                table, n
            ),
            Ok(_) => {}
            Err(e) => warn!("can't count the rows of table {}: {}", table, e),
        }
    }

    let mut rows_loaded: u64 = 0;
    let mut batches = 0;
    for (i, batch) in CsvBatches::new(rdr, options.chunk_size).enumerate() {
        let batch = batch.map_err(|source| LoadError::Read {
            batch: i + 1,
            path: path.to_path_buf(),
            source,
        })?;
        let mode = if batch.index == 1 {
            options.mode
        } else {
            WriteMode::Append
        };
        let n = write_batch(conn, table, &schema, &batch, mode).map_err(|source| {
            LoadError::Write {
                batch: batch.index,
                table: table.to_string(),
                source,
            }
        })?;
        info!(
            "inserted batch {} of {} rows into table {}",
            batch.index, n, table
        );
        rows_loaded += n as u64;
        batches += 1;
    }
    if batches == 0 && options.mode == WriteMode::Replace {
        recreate_table(conn, table, &schema).map_err(|source| LoadError::Recreate {
            table: table.to_string(),
            source,
        })?;
        info!("{} has no data rows, table {} recreated empty", path.display(), table);
        return Ok(0);
    }
    info!("loaded {} rows into table {}", rows_loaded, table);
    Ok(rows_loaded)
}

/// Derive a table name from a file name, e.g. `vra_01_2024.csv` ->
/// `vra_01_2024`.  Returns `None` if nothing usable is left.
pub fn table_name_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.to_lowercase();
    let re = Regex::new(r"[^a-z0-9_]+").unwrap();
    let name = re.replace_all(&stem, "_").trim_matches('_').to_string();
    if name.is_empty() {
        None
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        Some(format!("t_{}", name))
    } else {
        Some(name)
    }
}
