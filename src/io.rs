//! Module for reading input matrices and persisting simulation results.
//!
//! Matrices are stored as tab-separated tables with a header row and a
//! leading sample-ID column. Files ending in `.gz` are read and written
//! through gzip.
use crate::compose::{trait_correlation, VarianceReport};
use crate::pipeline::SimulationOutput;
use csv::{ReaderBuilder, WriterBuilder};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Data alignment error: {0}")]
    Alignment(String),
}

/// A matrix together with its row (sample) and column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledMatrix {
    pub row_ids: Vec<String>,
    pub col_ids: Vec<String>,
    pub values: Array2<f64>,
}

/// Default sample IDs `ID_1..ID_n`.
pub fn default_sample_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("ID_{}", i)).collect()
}

/// Default labels `{prefix}_1..{prefix}_n`.
pub fn default_labels(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}_{}", prefix, i)).collect()
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

fn open_reader(path: &Path) -> Result<Box<dyn Read>, IoError> {
    if !path.exists() {
        return Err(IoError::NotFound(path.to_string_lossy().into()));
    }
    let file = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Output sink; gzip streams must be finished to write their trailer.
enum OutputFile {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputFile {
    fn create(path: &Path) -> Result<Self, IoError> {
        let file = BufWriter::new(File::create(path)?);
        if is_gzip(path) {
            Ok(OutputFile::Gzip(GzEncoder::new(file, Compression::default())))
        } else {
            Ok(OutputFile::Plain(file))
        }
    }

    fn finish(self) -> Result<(), IoError> {
        let mut file = match self {
            OutputFile::Plain(file) => file,
            OutputFile::Gzip(encoder) => encoder.finish()?,
        };
        file.flush()?;
        Ok(())
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            OutputFile::Plain(file) => file.write(buf),
            OutputFile::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OutputFile::Plain(file) => file.flush(),
            OutputFile::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Flushes the csv buffer into the sink and closes it.
fn close_table(writer: csv::Writer<OutputFile>) -> Result<(), IoError> {
    writer
        .into_inner()
        .map_err(|e| IoError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))?
        .finish()
}

/// Reads a labelled numeric matrix (header row, first column = sample ID).
pub fn read_matrix(path: &Path) -> Result<LabelledMatrix, IoError> {
    log::info!("Loading matrix from {:?}", path);

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(open_reader(path)?);

    let col_ids: Vec<String> = reader.headers()?.iter().skip(1).map(String::from).collect();
    let n_cols = col_ids.len();

    let mut row_ids = Vec::new();
    let mut flat = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != n_cols + 1 {
            return Err(IoError::Parse(format!(
                "{:?} line {}: expected {} fields, found {}",
                path,
                line + 2,
                n_cols + 1,
                record.len()
            )));
        }
        row_ids.push(record[0].to_string());
        for field in record.iter().skip(1) {
            let value = field.trim().parse::<f64>().map_err(|e| {
                IoError::Parse(format!("{:?} line {}: '{}' is not a number ({})", path, line + 2, field, e))
            })?;
            flat.push(value);
        }
    }

    let values = Array2::from_shape_vec((row_ids.len(), n_cols), flat)
        .map_err(|e| IoError::Parse(format!("Failed to build matrix: {}", e)))?;
    log::info!("Matrix loaded: {} x {}", values.nrows(), values.ncols());

    Ok(LabelledMatrix { row_ids, col_ids, values })
}

/// Reads a square kinship matrix and checks that row and column labels agree.
pub fn read_kinship(path: &Path) -> Result<LabelledMatrix, IoError> {
    let kinship = read_matrix(path)?;
    if kinship.values.nrows() != kinship.values.ncols() {
        return Err(IoError::Alignment(format!(
            "Kinship must be square, found {} x {}",
            kinship.values.nrows(),
            kinship.values.ncols()
        )));
    }
    if kinship.row_ids != kinship.col_ids {
        return Err(IoError::Alignment("Kinship row and column sample IDs differ".into()));
    }
    Ok(kinship)
}

/// Writes a labelled matrix as a tab-separated table.
pub fn write_matrix(
    path: &Path,
    matrix: &Array2<f64>,
    row_ids: &[String],
    col_ids: &[String],
) -> Result<(), IoError> {
    if row_ids.len() != matrix.nrows() || col_ids.len() != matrix.ncols() {
        return Err(IoError::Alignment(format!(
            "Labels ({} rows, {} columns) do not match matrix {:?}",
            row_ids.len(),
            col_ids.len(),
            matrix.dim()
        )));
    }

    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(OutputFile::create(path)?);

    let mut header = Vec::with_capacity(col_ids.len() + 1);
    header.push("ID".to_string());
    header.extend(col_ids.iter().cloned());
    writer.write_record(&header)?;

    for (id, row) in row_ids.iter().zip(matrix.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(id.clone());
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    close_table(writer)
}

/// Writes budgeted and realised fractions per component slot.
pub fn write_variance_report(path: &Path, report: &VarianceReport) -> Result<(), IoError> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(OutputFile::create(path)?);

    writer.write_record(["component", "budgeted", "variance", "realized"])?;
    for entry in &report.entries {
        writer.write_record(&[
            entry.slot.to_string(),
            entry.budgeted.to_string(),
            entry.variance.to_string(),
            entry.realized.to_string(),
        ])?;
    }
    writer.write_record(&[
        "crossCovariance".to_string(),
        "0".to_string(),
        String::new(),
        report.cross_covariance().to_string(),
    ])?;
    close_table(writer)
}

/// Persists the phenotype, every non-zero component, the trait correlation
/// of the phenotype and the variance report into `out_dir`. Returns the written paths.
pub fn save_simulation_output(
    out_dir: &Path,
    output: &SimulationOutput,
    sample_ids: &[String],
    gzip: bool,
) -> Result<Vec<PathBuf>, IoError> {
    std::fs::create_dir_all(out_dir)?;
    let suffix = if gzip { "csv.gz" } else { "csv" };
    let trait_ids = default_labels("Trait", output.phenotype.values.ncols());
    let mut written = Vec::new();

    let path = out_dir.join(format!("phenotype.{}", suffix));
    write_matrix(&path, &output.phenotype.values, sample_ids, &trait_ids)?;
    written.push(path);

    for component in output.components.iter().filter(|c| c.target > 0.0) {
        let path = out_dir.join(format!("{}.{}", component.slot, suffix));
        write_matrix(&path, &component.matrix, sample_ids, &trait_ids)?;
        written.push(path);
    }

    if let Some(kinship) = &output.kinship {
        let path = out_dir.join(format!("kinship.{}", suffix));
        write_matrix(&path, kinship, sample_ids, sample_ids)?;
        written.push(path);
    }

    let path = out_dir.join(format!("trait_correlation.{}", suffix));
    write_matrix(&path, &trait_correlation(&output.phenotype.values), &trait_ids, &trait_ids)?;
    written.push(path);

    let path = out_dir.join("variance_report.csv");
    write_variance_report(&path, &output.phenotype.report)?;
    written.push(path);

    log::info!("Wrote {} files to {:?}", written.len(), out_dir);
    Ok(written)
}
