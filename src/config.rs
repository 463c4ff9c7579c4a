use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::db::loader::{parse_column_types, ColumnTypes, LoadOptions, WriteMode, DEFAULT_CHUNK_SIZE};
use crate::error::ConfigError;

pub const DEFAULT_URL_TEMPLATE: &str =
    "https://siros.anac.gov.br/siros/registros/diversos/vra/{year}/VRA_{year}_{month}.csv";
pub const DEFAULT_SCRATCH_DIR: &str = "temp_csv_files";
pub const DEFAULT_YEAR: i16 = 2024;

/// Where the tables live.
#[derive(Clone, Debug, PartialEq)]
pub enum Database {
    InMemory,
    File(PathBuf),
}

impl Database {
    /// Accepts `duckdb://<path>`, `duckdb://:memory:`, `:memory:` or a bare
    /// file path.  Any other `scheme://` is rejected.
    pub fn parse(s: &str) -> Result<Database, ConfigError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::MalformedConnection(s.to_string()));
        }
        let target = match s.split_once("://") {
            Some((scheme, rest)) => {
                if !scheme.eq_ignore_ascii_case("duckdb") {
                    return Err(ConfigError::UnsupportedDriver(scheme.to_string()));
                }
                rest
            }
            None => s,
        };
        match target {
            "" => Err(ConfigError::MalformedConnection(s.to_string())),
            ":memory:" => Ok(Database::InMemory),
            path => Ok(Database::File(PathBuf::from(path))),
        }
    }
}

/// All the settings of a run.  Built once at start-up and passed down by
/// reference.
#[derive(Clone, Debug)]
pub struct Config {
    pub database: Database,
    pub scratch_dir: PathBuf,
    /// Source url with `{year}` and `{month}` placeholders.
    pub url_template: String,
    pub year: i16,
    pub load: LoadOptions,
    pub http_timeout: Option<Duration>,
    /// Keep the downloaded file when its load fails.
    pub keep_failed_scratch: bool,
}

impl Config {
    /// Read the settings from the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database = match get("VRA_DATABASE_URL") {
            Some(url) => Database::parse(&url)?,
            None => return Err(ConfigError::Missing("VRA_DATABASE_URL")),
        };
        let url_template = get("VRA_URL_TEMPLATE").unwrap_or_else(|| DEFAULT_URL_TEMPLATE.to_string());
        if !url_template.contains("{month}") {
            return Err(ConfigError::Invalid {
                key: "VRA_URL_TEMPLATE",
                value: url_template,
                reason: "missing the {month} placeholder".to_string(),
            });
        }

        let year = match get("VRA_YEAR") {
            Some(v) => parse_year(&v)?,
            None => DEFAULT_YEAR,
        };
        let chunk_size = match get("VRA_CHUNK_SIZE") {
            Some(v) => parse_chunk_size(&v)?,
            None => DEFAULT_CHUNK_SIZE,
        };
        let mode = match get("VRA_WRITE_MODE") {
            Some(v) => v.parse::<WriteMode>().map_err(|reason| ConfigError::Invalid {
                key: "VRA_WRITE_MODE",
                value: v.clone(),
                reason,
            })?,
            None => WriteMode::Append,
        };
        let delimiter = match lookup("VRA_CSV_DELIMITER") {
            Some(v) if !v.is_empty() => parse_delimiter(&v)?,
            _ => b',',
        };
        let column_types = match get("VRA_COLUMN_TYPES") {
            Some(v) => parse_column_types(&v).map_err(|reason| ConfigError::Invalid {
                key: "VRA_COLUMN_TYPES",
                value: v.clone(),
                reason,
            })?,
            None => ColumnTypes::new(),
        };
        let http_timeout = match get("VRA_HTTP_TIMEOUT_SECS") {
            Some(v) => {
                let secs = v.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                    key: "VRA_HTTP_TIMEOUT_SECS",
                    value: v.clone(),
                    reason: e.to_string(),
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };
        let keep_failed_scratch = match get("VRA_KEEP_FAILED_SCRATCH") {
            Some(v) => match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "VRA_KEEP_FAILED_SCRATCH",
                        value: v,
                        reason: "expected true or false".to_string(),
                    })
                }
            },
            None => false,
        };

        Ok(Config {
            database,
            scratch_dir: get("VRA_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR)),
            url_template,
            year,
            load: LoadOptions {
                chunk_size,
                mode,
                delimiter,
                column_types,
            },
            http_timeout,
            keep_failed_scratch,
        })
    }
}

pub fn parse_year(s: &str) -> Result<i16, ConfigError> {
    match s.trim().parse::<i16>() {
        Ok(y) if (1900..=9998).contains(&y) => Ok(y),
        _ => Err(ConfigError::Invalid {
            key: "VRA_YEAR",
            value: s.to_string(),
            reason: "expected a four digit year".to_string(),
        }),
    }
}

pub fn parse_chunk_size(s: &str) -> Result<usize, ConfigError> {
    match s.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            key: "VRA_CHUNK_SIZE",
            value: s.to_string(),
            reason: "expected a positive integer".to_string(),
        }),
    }
}

/// A single ASCII character, or `\t` for tabs.
pub fn parse_delimiter(s: &str) -> Result<u8, ConfigError> {
    match s {
        "\\t" => Ok(b'\t'),
        _ if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        _ => Err(ConfigError::Invalid {
            key: "VRA_CSV_DELIMITER",
            value: s.to_string(),
            reason: "expected a single ascii character".to_string(),
        }),
    }
}
