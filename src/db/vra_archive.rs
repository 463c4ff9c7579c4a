// Monthly files of the ANAC "Voo Regular Ativo" (VRA) dataset, one row per
// scheduled flight with planned and actual departure/arrival times.
// https://www.gov.br/anac/pt-br/acesso-a-informacao/dados-abertos/areas-de-atuacao/voos-e-operacoes-aereas/voo-regular-ativo-vra

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use duckdb::Connection;
use log::{error, info, warn};
use reqwest::blocking::Client;

use crate::config::Config;
use crate::db::loader::{load, LoadOptions};
use crate::error::{FetchError, FilesystemError, LoadError};
use crate::fetch::fetch;
use crate::interval::month::Month;

#[derive(Clone, Debug)]
pub struct VraArchive {
    /// Where downloaded files are kept while they are loaded.
    pub scratch_dir: PathBuf,
    /// Source url with `{year}` and `{month}` placeholders.
    pub url_template: String,
    pub options: LoadOptions,
    pub keep_failed_scratch: bool,
}

/// What happened to one month of a run.
#[derive(Debug)]
pub enum Outcome {
    Loaded { rows: u64 },
    FetchFailed(FetchError),
    LoadFailed(LoadError),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Loaded { .. } => write!(f, "loaded"),
            Outcome::FetchFailed(e) => write!(f, "fetch failed: {}", e),
            Outcome::LoadFailed(e) => write!(f, "load failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct MonthReport {
    pub month: Month,
    pub table: String,
    pub outcome: Outcome,
}

impl MonthReport {
    pub fn rows(&self) -> u64 {
        match self.outcome {
            Outcome::Loaded { rows } => rows,
            _ => 0,
        }
    }
}

impl VraArchive {
    pub fn new(config: &Config) -> VraArchive {
        VraArchive {
            scratch_dir: config.scratch_dir.clone(),
            url_template: config.url_template.clone(),
            options: config.load.clone(),
            keep_failed_scratch: config.keep_failed_scratch,
        }
    }

    /// Name of the table holding one month of data, e.g. `vra_2024_03`.
    pub fn table_name(month: &Month) -> String {
        format!("vra_{}_{:02}", month.year(), month.month())
    }

    /// Source url for the month.
    pub fn url(&self, month: &Month) -> String {
        self.url_template
            .replace("{year}", &month.year().to_string())
            .replace("{month}", &format!("{:02}", month.month()))
    }

    /// Path of the scratch file for the month.  Does not check if the file exists.
    pub fn filename(&self, month: &Month) -> PathBuf {
        self.scratch_dir
            .join(format!("{}.csv", VraArchive::table_name(month)))
    }

    pub fn download_file(&self, client: &Client, month: &Month) -> Result<PathBuf, FetchError> {
        fetch(client, &self.url(month), &self.filename(month))
    }

    /// Load the scratch file of the month into its table.
    pub fn update_duckdb(&self, conn: &mut Connection, month: &Month) -> Result<u64, LoadError> {
        info!(
            "loading {} into table {} ({} mode, {} rows per batch) ...",
            self.filename(month).display(),
            VraArchive::table_name(month),
            self.options.mode,
            self.options.chunk_size
        );
        load(
            conn,
            &self.filename(month),
            &VraArchive::table_name(month),
            &self.options,
        )
    }

    /// Download each month and keep the files in the scratch directory.
    /// Failed months are logged and skipped.
    pub fn download_months(&self, client: &Client, months: &[Month]) -> Vec<(Month, Result<PathBuf, FetchError>)> {
        months
            .iter()
            .map(|month| {
                let res = self.download_file(client, month);
                match &res {
                    Ok(path) => info!("downloaded month {} to {}", month, path.display()),
                    Err(e) => error!("failed to download month {}: {}", month, e),
                }
                (*month, res)
            })
            .collect()
    }

    /// Download, load and clean up each month in turn.  A failure only
    /// affects its own month.
    pub fn update(&self, conn: &mut Connection, client: &Client, months: &[Month]) -> Vec<MonthReport> {
        months
            .iter()
            .map(|month| MonthReport {
                month: *month,
                table: VraArchive::table_name(month),
                outcome: self.update_month(conn, client, month),
            })
            .collect()
    }

    fn update_month(&self, conn: &mut Connection, client: &Client, month: &Month) -> Outcome {
        info!("working on month {} ...", month);
        let path = match self.download_file(client, month) {
            Ok(path) => path,
            Err(e) => {
                error!("failed to download month {}: {}", month, e);
                return Outcome::FetchFailed(e);
            }
        };

        let outcome = match self.update_duckdb(conn, month) {
            Ok(rows) => {
                info!("month {}: {} rows loaded", month, rows);
                Outcome::Loaded { rows }
            }
            Err(e) => {
                match e.batch() {
                    Some(batch) => error!("failed to load month {} at batch {}: {}", month, batch, e),
                    None => error!("failed to load month {}: {}", month, e),
                }
                Outcome::LoadFailed(e)
            }
        };

        if self.keep_failed_scratch && matches!(outcome, Outcome::LoadFailed(_)) {
            warn!("keeping {} for inspection", path.display());
        } else {
            match remove_scratch(&path) {
                Ok(()) => info!("removed temporary file for month {}", month),
                Err(e) => error!("{}", e),
            }
        }
        outcome
    }
}

fn remove_scratch(path: &Path) -> Result<(), FilesystemError> {
    fs::remove_file(path).map_err(|source| FilesystemError::Remove {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::error::Error;

    use crate::db::loader::{ColumnType, WriteMode};
    use crate::fetch::{client, tests::serve};
    use crate::utils::lib_duckdb::{row_count, table_exists};

    use super::*;

    fn archive(base_url: &str, scratch_dir: &Path, chunk_size: usize, mode: WriteMode) -> VraArchive {
        VraArchive {
            scratch_dir: scratch_dir.to_path_buf(),
            url_template: format!("{}/VRA_{{year}}_{{month}}.csv", base_url),
            options: LoadOptions {
                chunk_size,
                mode,
                ..LoadOptions::default()
            },
            keep_failed_scratch: false,
        }
    }

    fn five_flights() -> Vec<u8> {
        "Empresa,Voo,Origem,Destino\n\
         AZU,4001,SBKP,SBCF\n\
         GLO,1234,SBGR,SBRJ\n\
         TAM,3300,SBSP,SBBR\n\
         AZU,4002,SBCF,SBKP\n\
         GLO,1235,SBRJ,SBGR\n"
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn table_name_is_deterministic() {
        for m in 1..=12 {
            let month = Month::new(2024, m).unwrap();
            let name = VraArchive::table_name(&month);
            assert_eq!(name, VraArchive::table_name(&Month::new(2024, m).unwrap()));
            assert_eq!(name, format!("vra_2024_{:02}", m));
        }
    }

    #[test]
    fn urls_and_filenames() {
        let archive = archive("https://example.com", Path::new("temp_csv_files"), 10, WriteMode::Append);
        let month = Month::new(2024, 3).unwrap();
        assert_eq!(archive.url(&month), "https://example.com/VRA_2024_03.csv");
        assert_eq!(
            archive.filename(&month),
            PathBuf::from("temp_csv_files/vra_2024_03.csv")
        );
        let default = VraArchive {
            url_template: crate::config::DEFAULT_URL_TEMPLATE.to_string(),
            ..archive
        };
        assert_eq!(
            default.url(&Month::new(2024, 1).unwrap()),
            "https://siros.anac.gov.br/siros/registros/diversos/vra/2024/VRA_2024_01.csv"
        );
    }

    #[test]
    fn end_to_end_march() -> Result<(), Box<dyn Error>> {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
        let base = serve(HashMap::from([(
            "/VRA_2024_03.csv".to_string(),
            (200, five_flights()),
        )]));
        let dir = tempfile::tempdir()?;
        let archive = archive(&base, &dir.path().join("scratch"), 2, WriteMode::Append);
        let mut conn = Connection::open_in_memory()?;
        let month = Month::new(2024, 3)?;

        let reports = archive.update(&mut conn, &client(None)?, &[month]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].table, "vra_2024_03");
        assert!(matches!(reports[0].outcome, Outcome::Loaded { rows: 5 }));
        assert_eq!(row_count(&conn, "vra_2024_03")?, 5);
        assert!(!archive.filename(&month).exists());
        Ok(())
    }

    #[test]
    fn failed_download_skips_month() -> Result<(), Box<dyn Error>> {
        let base = serve(HashMap::from([
            ("/VRA_2024_01.csv".to_string(), (200, five_flights())),
            ("/VRA_2024_03.csv".to_string(), (200, five_flights())),
        ]));
        let dir = tempfile::tempdir()?;
        let archive = archive(&base, dir.path(), 10_000, WriteMode::Replace);
        let mut conn = Connection::open_in_memory()?;
        let months: Vec<Month> = (1..=3).map(|m| Month::new(2024, m).unwrap()).collect();

        let reports = archive.update(&mut conn, &client(None)?, &months);
        assert!(matches!(reports[0].outcome, Outcome::Loaded { rows: 5 }));
        match &reports[1].outcome {
            Outcome::FetchFailed(e) => assert_eq!(e.status_code(), Some(404)),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(reports[2].outcome, Outcome::Loaded { rows: 5 }));
        assert!(!table_exists(&conn, "vra_2024_02")?);
        assert!(!archive.filename(&months[1]).exists());
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn failed_load_still_removes_scratch() -> Result<(), Box<dyn Error>> {
        let base = serve(HashMap::from([(
            "/VRA_2024_04.csv".to_string(),
            (200, five_flights()),
        )]));
        let dir = tempfile::tempdir()?;
        let mut archive = archive(&base, dir.path(), 2, WriteMode::Replace);
        archive
            .options
            .column_types
            .insert("Empresa".to_string(), ColumnType::Integer);
        let mut conn = Connection::open_in_memory()?;
        let month = Month::new(2024, 4)?;

        let reports = archive.update(&mut conn, &client(None)?, &[month]);
        match &reports[0].outcome {
            Outcome::LoadFailed(e) => assert_eq!(e.batch(), Some(1)),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(reports[0].rows(), 0);
        assert!(!archive.filename(&month).exists());

        // keep the file around when asked to
        archive.keep_failed_scratch = true;
        let reports = archive.update(&mut conn, &client(None)?, &[month]);
        assert!(matches!(reports[0].outcome, Outcome::LoadFailed(_)));
        assert!(archive.filename(&month).exists());
        Ok(())
    }

    #[test]
    fn rerun_append_duplicates_replace_does_not() -> Result<(), Box<dyn Error>> {
        let base = serve(HashMap::from([(
            "/VRA_2024_05.csv".to_string(),
            (200, five_flights()),
        )]));
        let dir = tempfile::tempdir()?;
        let mut conn = Connection::open_in_memory()?;
        let month = Month::new(2024, 5)?;
        let client = client(None)?;

        let append = archive(&base, dir.path(), 3, WriteMode::Append);
        append.update(&mut conn, &client, &[month]);
        append.update(&mut conn, &client, &[month]);
        assert_eq!(row_count(&conn, "vra_2024_05")?, 10);

        let replace = archive(&base, dir.path(), 3, WriteMode::Replace);
        replace.update(&mut conn, &client, &[month]);
        replace.update(&mut conn, &client, &[month]);
        assert_eq!(row_count(&conn, "vra_2024_05")?, 5);
        Ok(())
    }

    #[test]
    fn download_months_keeps_files() -> Result<(), Box<dyn Error>> {
        let base = serve(HashMap::from([(
            "/VRA_2024_06.csv".to_string(),
            (200, five_flights()),
        )]));
        let dir = tempfile::tempdir()?;
        let archive = archive(&base, dir.path(), 10, WriteMode::Append);
        let months = vec![Month::new(2024, 6)?, Month::new(2024, 7)?];

        let results = archive.download_months(&client(None)?, &months);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert_eq!(fs::read(archive.filename(&months[0]))?, five_flights());
        assert!(!archive.filename(&months[1]).exists());
        Ok(())
    }
}
