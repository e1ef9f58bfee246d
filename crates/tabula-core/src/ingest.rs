//! Dataset creation from external sources.
//!
//! Every entrypoint creates the dataset record synchronously and hands the row import to the
//! job queue. Import failures are logged and leave the dataset `pending`.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::sync::Arc;

use tabula_model::{recognize_dates, recognize_dates_from_schema, Dataset, DatasetId, Frame, Schema, Value};
use tabula_storage::JobQueue;

use crate::datasets::DatasetService;
use crate::error::{CalcError, CalcResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub has_header: bool,
    /// Rows inspected per column when choosing between number, boolean and text.
    pub sample_rows: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            sample_rows: 100,
        }
    }
}

/// Opens the byte stream behind a URL.
pub trait UrlFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// Reads `file://` URLs and bare paths from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileFetcher;

impl UrlFetcher for LocalFileFetcher {
    fn fetch(&self, url: &str) -> io::Result<Box<dyn Read + Send>> {
        let path = match url.split_once("://") {
            Some(("file", path)) => path,
            Some((scheme, _)) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unsupported URL scheme {scheme}"),
                ))
            }
            None => url,
        };
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

pub struct Ingestor {
    datasets: Arc<DatasetService>,
    jobs: Arc<dyn JobQueue>,
    fetcher: Arc<dyn UrlFetcher>,
    csv: CsvOptions,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("csv", &self.csv)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(
        datasets: Arc<DatasetService>,
        jobs: Arc<dyn JobQueue>,
        fetcher: Arc<dyn UrlFetcher>,
        csv: CsvOptions,
    ) -> Self {
        Self {
            datasets,
            jobs,
            fetcher,
            csv,
        }
    }

    /// Create a dataset from the CSV behind `url`.
    ///
    /// `file` URLs are refused unless `allow_local_file` is set. A source that cannot be opened
    /// fails here with [`CalcError::IoUnavailable`]; parse errors surface only in the job log.
    pub fn create_from_url(&self, url: &str, allow_local_file: bool) -> CalcResult<Dataset> {
        if !allow_local_file && url.starts_with("file") {
            return Err(CalcError::IoUnavailable(format!(
                "local files are not allowed: {url}"
            )));
        }
        let reader = self
            .fetcher
            .fetch(url)
            .map_err(|e| CalcError::IoUnavailable(format!("{url}: {e}")))?;
        self.create_from_file(reader)
    }

    /// Create a dataset from an uploaded CSV stream.
    pub fn create_from_file(&self, reader: impl Read + Send + 'static) -> CalcResult<Dataset> {
        let dataset = self.datasets.create()?;
        let id = dataset.id.clone();
        let datasets = Arc::clone(&self.datasets);
        let csv = self.csv.clone();
        self.dispatch(&dataset.id, move || {
            let frame = recognize_dates(&read_csv(reader, &csv)?);
            datasets.save(&id, frame)?;
            Ok(())
        });
        Ok(dataset)
    }

    /// Append CSV rows to an existing dataset in the background.
    ///
    /// Date columns declared in the dataset schema are converted with the schema as the guide.
    pub fn import_csv(&self, dataset_id: &DatasetId, reader: impl Read + Send + 'static) -> CalcResult<()> {
        self.datasets.get(dataset_id)?;
        let id = dataset_id.clone();
        let datasets = Arc::clone(&self.datasets);
        let csv = self.csv.clone();
        self.dispatch(dataset_id, move || {
            let frame = read_csv(reader, &csv)?;
            let schema = datasets.get(&id)?.schema;
            datasets.save(&id, recognize(&schema, &frame))?;
            Ok(())
        });
        Ok(())
    }

    /// Create a dataset whose schema is given up front as a JSON document.
    ///
    /// The document is either the ordered array form a dataset serializes to, or an object
    /// mapping column names to `{label, simpletype, olap_role}`.
    pub fn create_from_schema_document(&self, document: &str) -> CalcResult<Dataset> {
        let schema = parse_schema_document(document)?;
        let dataset = self.datasets.create_with_schema(schema)?;
        let id = dataset.id.clone();
        let datasets = Arc::clone(&self.datasets);
        let columns: Vec<String> = dataset.schema.keys().map(str::to_string).collect();
        self.dispatch(&dataset.id, move || {
            let frame = Frame::new(columns)?;
            datasets.save(&id, frame)?;
            Ok(())
        });
        Ok(dataset)
    }

    fn dispatch(&self, id: &DatasetId, job: impl FnOnce() -> CalcResult<()> + Send + 'static) {
        let name = format!("import {id}");
        let id = id.clone();
        self.jobs.submit(
            &name,
            Box::new(move || {
                if let Err(err) = job() {
                    log::warn!("import into dataset {id} failed: {err}");
                }
            }),
        );
    }
}

fn parse_schema_document(document: &str) -> CalcResult<Schema> {
    let decode = |e: serde_json::Error| CalcError::QueryDecode {
        param: "schema",
        message: e.to_string(),
    };
    let value: serde_json::Value = serde_json::from_str(document).map_err(decode)?;
    let value = match value {
        serde_json::Value::Object(columns) => serde_json::Value::Array(
            columns
                .into_iter()
                .map(|(name, mut column)| {
                    if let serde_json::Value::Object(fields) = &mut column {
                        fields.insert("name".into(), serde_json::Value::String(name.clone()));
                        fields
                            .entry("label")
                            .or_insert_with(|| serde_json::Value::String(name));
                    }
                    column
                })
                .collect(),
        ),
        other => other,
    };
    serde_json::from_value(value).map_err(decode)
}

/// Parse CSV into a frame named by header labels.
///
/// Columns are typed from the first `sample_rows` rows; empty fields become null.
pub fn read_csv(reader: impl Read, options: &CsvOptions) -> CalcResult<Frame> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|e| CalcError::IoUnavailable(format!("csv: {e}")))?;
        records.push(record.iter().map(str::to_string).collect());
    }

    let mut headers = if options.has_header && !records.is_empty() {
        records.remove(0)
    } else {
        Vec::new()
    };
    let column_count = records
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(headers.len()))
        .max()
        .unwrap_or(0);
    headers.extend((headers.len()..column_count).map(|i| format!("Column{}", i + 1)));

    let kinds: Vec<FieldKind> = (0..column_count)
        .map(|idx| {
            FieldKind::infer(
                records
                    .iter()
                    .take(options.sample_rows)
                    .filter_map(|row| row.get(idx))
                    .map(String::as_str),
            )
        })
        .collect();

    let mut frame = Frame::new(headers)?;
    for row in &records {
        let values = kinds
            .iter()
            .enumerate()
            .map(|(idx, kind)| kind.parse(row.get(idx).map(String::as_str).unwrap_or("")))
            .collect();
        frame.push_row(values)?;
    }
    Ok(frame)
}

/// Convert text columns holding dates, driven by the schema when the dataset already has one.
fn recognize(schema: &Schema, frame: &Frame) -> Frame {
    if schema.is_empty() {
        recognize_dates(frame)
    } else {
        recognize_dates_from_schema(schema, frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldKind {
    Number,
    Boolean,
    Text,
}

impl FieldKind {
    fn infer<'a>(fields: impl Iterator<Item = &'a str>) -> FieldKind {
        let mut numbers = true;
        let mut booleans = true;
        let mut seen = false;
        for field in fields.map(str::trim).filter(|f| !f.is_empty()) {
            seen = true;
            numbers &= field.parse::<f64>().is_ok_and(f64::is_finite);
            booleans &= parse_bool(field).is_some();
        }
        match (seen, numbers, booleans) {
            (true, true, _) => FieldKind::Number,
            (true, false, true) => FieldKind::Boolean,
            _ => FieldKind::Text,
        }
    }

    fn parse(self, field: &str) -> Value {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match self {
            FieldKind::Number => trimmed
                .parse::<f64>()
                .map(Value::finite)
                .unwrap_or_else(|_| Value::Text(field.to_string())),
            FieldKind::Boolean => parse_bool(trimmed)
                .map(Value::Boolean)
                .unwrap_or_else(|| Value::Text(field.to_string())),
            FieldKind::Text => Value::Text(field.to_string()),
        }
    }
}

fn parse_bool(field: &str) -> Option<bool> {
    if field.eq_ignore_ascii_case("true") {
        Some(true)
    } else if field.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
