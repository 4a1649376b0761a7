//! Record sources: pull-based producers of records in arrival order

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::PipelineError;
use crate::record::{decode_record, Record};

/// Pull-based stream of records.
pub trait RecordSource {
    /// Block until the next record is available.
    ///
    /// `Ok(None)` means the stream is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>, PipelineError>;

    /// Messages dropped because they could not be decoded
    fn skipped_messages(&self) -> usize {
        0
    }

    /// Short description for logs
    fn describe(&self) -> String;
}

/// In-memory source over a fixed list of records
#[derive(Debug)]
pub struct VecSource {
    records: std::vec::IntoIter<Record>,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl RecordSource for VecSource {
    fn next_record(&mut self) -> Result<Option<Record>, PipelineError> {
        Ok(self.records.next())
    }

    fn describe(&self) -> String {
        format!("{} in-memory records", self.records.len())
    }
}

/// Buffer size for file reads (256KB)
const FILE_BUF_SIZE: usize = 256 * 1024;

/// Newline-delimited JSON file, gunzipped when the name ends in `.gz`
pub struct FileSource {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    line: String,
    line_no: usize,
    skipped: usize,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("line_no", &self.line_no)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(|e| {
            PipelineError::source_unavailable(format!("{}: {e}", path.display()))
        })?;
        let inner: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self {
            path: path.to_path_buf(),
            reader: Box::new(BufReader::with_capacity(FILE_BUF_SIZE, inner)),
            line: String::new(),
            line_no: 0,
            skipped: 0,
        })
    }
}

impl RecordSource for FileSource {
    fn next_record(&mut self) -> Result<Option<Record>, PipelineError> {
        loop {
            self.line.clear();
            let n = self.reader.read_line(&mut self.line).map_err(|e| {
                PipelineError::source_unavailable(format!(
                    "{}:{}: {e}",
                    self.path.display(),
                    self.line_no + 1
                ))
            })?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match decode_record(trimmed.as_bytes()) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    self.skipped += 1;
                    log::warn!("{}:{}: skipping line: {e}", self.path.display(), self.line_no);
                }
            }
        }
    }

    fn skipped_messages(&self) -> usize {
        self.skipped
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
