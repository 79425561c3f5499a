//! Streaming reader for delimited data files.
//!
//! [`RowReader`] yields one [`Row`] per record without buffering the file, so
//! files of any size load in bounded memory. Files ending in `.tsv` are read
//! tab-delimited, everything else comma-delimited. Quoting follows RFC 4180.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::config::LoadConfig;
use crate::error::{ProvisionError, Result};

/// Options for reading a delimited file.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Discard the first record.
    pub has_header: bool,
    /// Replacement for empty fields.
    pub null_sentinel: String,
    /// Delimiter override; `None` picks one from the file extension.
    pub delimiter: Option<u8>,
    /// Upper bound on field size in bytes; caps the runtime ceiling.
    pub max_field_size: Option<usize>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            null_sentinel: "99999".to_string(),
            delimiter: None,
            max_field_size: None,
        }
    }
}

impl From<&LoadConfig> for ReadOptions {
    fn from(config: &LoadConfig) -> Self {
        Self {
            has_header: config.has_header,
            null_sentinel: config.null_sentinel.clone(),
            delimiter: None,
            max_field_size: config.max_field_size,
        }
    }
}

/// One data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based position among data rows; the header is not counted.
    pub index: u64,
    /// Field values with empty fields already replaced by the sentinel.
    pub fields: Vec<String>,
}

/// Delimiter implied by a file's extension.
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("tsv") => b'\t',
        _ => b',',
    }
}

/// Largest field size the runtime can hold.
///
/// Starts at `u64::MAX` and divides by ten until the value fits an
/// allocation (`isize::MAX` bytes on every Rust target).
pub fn field_size_ceiling() -> Result<usize> {
    let mut limit = u64::MAX;
    while limit > 0 {
        match usize::try_from(limit) {
            Ok(size) if size <= isize::MAX as usize => return Ok(size),
            _ => limit /= 10,
        }
    }
    Err(ProvisionError::FieldSizeExceeded { row: 0, limit: 0 })
}

/// Lazy, single-pass iterator over the rows of a delimited file.
pub struct RowReader<R: Read = File> {
    records: csv::StringRecordsIntoIter<R>,
    null_sentinel: String,
    field_limit: usize,
    delimiter: u8,
    next_index: u64,
}

impl RowReader<File> {
    /// Open a data file, choosing the delimiter from its extension.
    pub fn open<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = options.delimiter.unwrap_or_else(|| delimiter_for(path));
        let file = File::open(path)?;
        debug!(
            "Opened {:?} ({} delimited, header: {})",
            path,
            if delimiter == b'\t' { "tab" } else { "comma" },
            options.has_header
        );
        Self::from_reader(file, delimiter, options)
    }
}

impl<R: Read> RowReader<R> {
    /// Read delimited records from any byte source.
    pub fn from_reader(reader: R, delimiter: u8, options: &ReadOptions) -> Result<Self> {
        let ceiling = field_size_ceiling()?;
        let field_limit = options
            .max_field_size
            .map_or(ceiling, |max| max.min(ceiling));

        let records = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(options.has_header)
            .flexible(true)
            .from_reader(reader)
            .into_records();

        Ok(Self {
            records,
            null_sentinel: options.null_sentinel.clone(),
            field_limit,
            delimiter,
            next_index: 1,
        })
    }

    /// The delimiter in use.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// The effective field-size ceiling in bytes.
    pub fn field_limit(&self) -> usize {
        self.field_limit
    }
}

impl<R: Read> Iterator for RowReader<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        let index = self.next_index;
        self.next_index += 1;

        let record = match record {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };

        let mut fields = Vec::with_capacity(record.len());
        for field in record.iter() {
            if field.len() > self.field_limit {
                return Some(Err(ProvisionError::FieldSizeExceeded {
                    row: index,
                    limit: self.field_limit,
                }));
            }
            if field.is_empty() {
                fields.push(self.null_sentinel.clone());
            } else {
                fields.push(field.to_string());
            }
        }

        Some(Ok(Row { index, fields }))
    }
}
