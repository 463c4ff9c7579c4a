use std::{error::Error, path::Path, path::PathBuf};

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tabled::{builder::Builder, settings::Style};
use vra::{
    config::{parse_chunk_size, parse_year, Config},
    db::{
        loader::{load, parse_column_type, table_name_from_path, ColumnType, WriteMode},
        vra_archive::{MonthReport, Outcome, VraArchive},
    },
    fetch::client,
    interval::month::Month,
    utils::lib_duckdb,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod.  Settings are read from `.env/<env>.env`.
    #[arg(short, long, default_value = "prod")]
    env: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct LoadArgs {
    /// Rows per batch
    #[arg(long, value_parser = chunk_size)]
    chunk_size: Option<usize>,

    /// replace or append
    #[arg(long)]
    mode: Option<WriteMode>,

    /// Column type override, e.g. `--column-type "Número Voo=integer"`.  Can be repeated.
    #[arg(long = "column-type", value_parser = parse_column_type)]
    column_types: Vec<(String, ColumnType)>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the monthly files and load each one into its own table
    Run {
        #[arg(long, value_parser = year)]
        year: Option<i16>,

        /// Month of the year, 1 to 12.  Can be repeated.  All months if not set.
        #[arg(short, long)]
        month: Vec<i8>,

        /// Keep the downloaded file if its load fails
        #[arg(long)]
        keep_failed: bool,

        #[command(flatten)]
        load: LoadArgs,
    },
    /// Only download the monthly files into the scratch directory
    Download {
        #[arg(long, value_parser = year)]
        year: Option<i16>,

        #[arg(short, long)]
        month: Vec<i8>,
    },
    /// Load a local CSV file.  The file is not removed.
    Load {
        path: PathBuf,

        /// Table name, derived from the file name if not set
        #[arg(long)]
        table: Option<String>,

        #[command(flatten)]
        load: LoadArgs,
    },
}

fn chunk_size(s: &str) -> Result<usize, String> {
    parse_chunk_size(s).map_err(|e| e.to_string())
}

fn year(s: &str) -> Result<i16, String> {
    parse_year(s).map_err(|e| e.to_string())
}

fn apply(config: &mut Config, args: LoadArgs) {
    if let Some(chunk_size) = args.chunk_size {
        config.load.chunk_size = chunk_size;
    }
    if let Some(mode) = args.mode {
        config.load.mode = mode;
    }
    config.load.column_types.extend(args.column_types);
}

fn months(year: i16, month: &[i8]) -> Result<Vec<Month>, Box<dyn Error>> {
    if month.is_empty() {
        return Ok(Month::all_in_year(year)?);
    }
    let mut out = Vec::with_capacity(month.len());
    for m in month {
        out.push(Month::new(year, *m)?);
    }
    Ok(out)
}

/// Make an ASCII table from the run results
fn ascii_table(reports: &[MonthReport]) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["Month", "Table", "Rows", "Outcome"]);
    for report in reports {
        builder.push_record(vec![
            report.month.to_string(),
            report.table.clone(),
            report.rows().to_string(),
            report.outcome.to_string(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::sharp());
    table
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let env_file = format!(".env/{}.env", args.env);
    if let Err(e) = dotenvy::from_path(Path::new(&env_file)) {
        warn!("not reading {}: {}", env_file, e);
    }
    let mut config = Config::from_env()?;

    match args.command {
        Command::Run {
            year,
            month,
            keep_failed,
            load,
        } => {
            apply(&mut config, load);
            config.keep_failed_scratch |= keep_failed;
            let months = months(year.unwrap_or(config.year), &month)?;
            let mut conn = lib_duckdb::open(&config.database)?;
            let client = client(config.http_timeout)?;

            let archive = VraArchive::new(&config);
            let reports = archive.update(&mut conn, &client, &months);
            let loaded = reports
                .iter()
                .filter(|r| matches!(r.outcome, Outcome::Loaded { .. }))
                .count();
            info!("{} of {} months loaded", loaded, reports.len());
            println!("{}", ascii_table(&reports));
        }
        Command::Download { year, month } => {
            let months = months(year.unwrap_or(config.year), &month)?;
            let client = client(config.http_timeout)?;
            let archive = VraArchive::new(&config);
            let results = archive.download_months(&client, &months);
            let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
            info!("{} of {} files downloaded", ok, results.len());
        }
        Command::Load { path, table, load: load_args } => {
            apply(&mut config, load_args);
            let table = match table.or_else(|| table_name_from_path(&path)) {
                Some(table) => table,
                None => return Err(format!("can't derive a table name from {}", path.display()).into()),
            };
            let mut conn = lib_duckdb::open(&config.database)?;
            match load(&mut conn, &path, &table, &config.load) {
                Ok(n) => info!("loaded {} rows from {} into table {}", n, path.display(), table),
                Err(e) => error!("{}", e),
            }
        }
    }

    Ok(())
}
