use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use flate2::read::GzDecoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;
use tracing::warn;

use crate::config::{FileNames, ResolvedConfig};
use crate::error::PipelineError;
use crate::table::Table;

/// Layout of the pipeline's data directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
    files: FileNames,
}

impl Store {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            root: config.data_dir.clone(),
            files: config.files.clone(),
        }
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self {
            root,
            files: FileNames::default(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn scientific_names_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.scientific_names)
    }

    pub fn raw_interactions_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.raw_interactions)
    }

    pub fn canonical_interactions_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.canonical_interactions)
    }

    pub fn checklist_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.checklist)
    }

    pub fn enrichment_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.enrichment)
    }

    pub fn relationships_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.relationships)
    }

    pub fn species_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.species)
    }

    pub fn occurrences_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.occurrences)
    }

    pub fn occurrences_cleaned_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.occurrences_cleaned)
    }

    pub fn companions_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.companions)
    }

    pub fn companion_relations_path(&self) -> Utf8PathBuf {
        self.root.join(&self.files.companion_relations)
    }

    /// Completion log kept next to an append-only output table.
    pub fn checkpoint_path(output: &Utf8Path) -> Utf8PathBuf {
        let file_name = output.file_name().unwrap_or("output");
        output.with_file_name(format!("{file_name}.done"))
    }

    pub fn ensure_root(&self) -> Result<(), PipelineError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))
    }

    /// Opens a source file, decompressing `.gz` files on the fly.
    pub fn open_input(path: &Utf8Path) -> Result<Box<dyn Read>, PipelineError> {
        if !path.as_std_path().is_file() {
            return Err(PipelineError::MissingInput(path.to_string()));
        }
        let file = File::open(path.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("open {path}: {err}")))?;
        if path.extension() == Some("gz") {
            Ok(Box::new(GzDecoder::new(BufReader::new(file))))
        } else {
            Ok(Box::new(BufReader::new(file)))
        }
    }

    pub fn read_table(path: &Utf8Path) -> Result<Table, PipelineError> {
        Self::read_table_with_delimiter(path, b',')
    }

    pub fn read_table_with_delimiter(path: &Utf8Path, delimiter: u8) -> Result<Table, PipelineError> {
        let reader = Self::open_input(path)?;
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| PipelineError::csv(path.as_str(), err))?
            .clone();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| PipelineError::csv(path.as_str(), err))?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record);
        }
        Ok(Table {
            name: display_name(path),
            headers,
            rows,
        })
    }

    pub fn read_rows<T: DeserializeOwned>(path: &Utf8Path) -> Result<Vec<T>, PipelineError> {
        let reader = Self::open_input(path)?;
        let mut reader = ReaderBuilder::new().from_reader(reader);
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row.map_err(|err| PipelineError::csv(path.as_str(), err))?);
        }
        Ok(rows)
    }

    /// Replaces `path` with the serialized rows in one rename.
    pub fn write_rows_atomic<T: Serialize>(
        path: &Utf8Path,
        headers: &[&str],
        rows: &[T],
    ) -> Result<usize, PipelineError> {
        Self::replace_atomic(path, |writer| {
            writer
                .write_record(headers)
                .map_err(|err| PipelineError::csv(path.as_str(), err))?;
            for row in rows {
                writer
                    .serialize(row)
                    .map_err(|err| PipelineError::csv(path.as_str(), err))?;
            }
            Ok(())
        })?;
        Ok(rows.len())
    }

    pub fn write_table_atomic(path: &Utf8Path, table: &Table) -> Result<usize, PipelineError> {
        Self::replace_atomic(path, |writer| {
            writer
                .write_record(&table.headers)
                .map_err(|err| PipelineError::csv(path.as_str(), err))?;
            for row in &table.rows {
                writer
                    .write_record(row)
                    .map_err(|err| PipelineError::csv(path.as_str(), err))?;
            }
            Ok(())
        })?;
        Ok(table.rows.len())
    }

    fn replace_atomic<F>(path: &Utf8Path, write: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut csv::Writer<&mut tempfile::NamedTempFile>) -> Result<(), PipelineError>,
    {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".vigrow-table")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        {
            let mut writer = WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_writer(&mut temp);
            write(&mut writer)?;
            writer
                .flush()
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        }
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path())
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        }
        temp.persist(path.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Append-only CSV output written by a single fetch stage. The header row is
/// written only when the file is new or empty, so a resumed run keeps adding
/// to the same file.
pub struct AppendTable {
    path: Utf8PathBuf,
    writer: csv::Writer<File>,
    rows_written: usize,
}

impl AppendTable {
    pub fn open(path: &Utf8Path, headers: &[&str]) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        }
        let needs_header = drop_torn_tail(path)? == 0;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("open {path}: {err}")))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer
                .write_record(headers)
                .map_err(|err| PipelineError::csv(path.as_str(), err))?;
            writer
                .flush()
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows_written: 0,
        })
    }

    /// Writes and flushes a batch so it survives a crash of the next request.
    pub fn append<T: Serialize>(&mut self, rows: &[T]) -> Result<usize, PipelineError> {
        for row in rows {
            self.writer
                .serialize(row)
                .map_err(|err| PipelineError::csv(self.path.as_str(), err))?;
        }
        self.writer
            .flush()
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        self.rows_written += rows.len();
        Ok(rows.len())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

/// Cuts a partially written final row left by a crash so the next append
/// starts on a fresh line. Returns the remaining length.
fn drop_torn_tail(path: &Utf8Path) -> Result<u64, PipelineError> {
    let bytes = match fs::read(path.as_std_path()) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(PipelineError::Filesystem(format!("read {path}: {err}"))),
    };
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(bytes.len() as u64);
    }
    let keep = bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |index| index + 1) as u64;
    warn!(path = %path, dropped = bytes.len() as u64 - keep, "dropping torn final row");
    OpenOptions::new()
        .write(true)
        .open(path.as_std_path())
        .and_then(|file| file.set_len(keep))
        .map_err(|err| PipelineError::Filesystem(format!("truncate {path}: {err}")))?;
    Ok(keep)
}

/// First column of an existing output table, used once to seed a missing
/// checkpoint log from output written by an older run.
pub fn first_column_values(path: &Utf8Path) -> Result<Vec<String>, PipelineError> {
    if !path.as_std_path().is_file() {
        return Ok(Vec::new());
    }
    let table = Store::read_table(path)?;
    Ok(table
        .rows
        .iter()
        .filter_map(|row: &StringRecord| row.get(0))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect())
}

fn display_name(path: &Utf8Path) -> String {
    path.file_name().unwrap_or(path.as_str()).to_string()
}
