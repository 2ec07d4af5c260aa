use std::{collections::BTreeSet, fs::File, io::{BufRead, BufReader, BufWriter, Write}};

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;

use crate::runner::EmbeddingRow;

pub const ID_COLUMN: &str = "image_id";
const DELIMITER: char = '\t';

#[derive(thiserror::Error, Debug)]
pub enum TableError {
    #[error("Error writing table to {path}")]
    Write { path: Utf8PathBuf, #[source] source: std::io::Error },
    #[error("Error reading table at {path}")]
    Read { path: Utf8PathBuf, #[source] source: std::io::Error },
    #[error("Malformed table at {path}, line {line}: {reason}")]
    Malformed { path: Utf8PathBuf, line: usize, reason: String },
}

/// Writes `image_id, dim_0 .. dim_{k-1}` as a tab separated file, one row per embedding in
/// input order. `k` is taken from the first row.
pub fn write_embeddings_tsv(rows: &[EmbeddingRow], path: &Utf8Path) -> Result<(), TableError> {
    debug!("Writing {} embedding rows to {}", rows.len(), path);
    let dimension = rows.first().map_or(0, |row| row.vector.len());
    let header = std::iter::once(ID_COLUMN.to_owned())
        .chain((0..dimension).map(dim_column));

    write_tsv(path, header, rows.iter().map(|row| {
        std::iter::once(sanitize_cell(&row.item_id))
            .chain(row.vector.iter().map(f32::to_string))
    }))
}

/// Embeddings read back from a file written by [`write_embeddings_tsv`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingTable {
    pub ids: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
}

pub fn read_embeddings_tsv(path: &Utf8Path) -> Result<EmbeddingTable, TableError> {
    let read_error = |e: std::io::Error| TableError::Read { path: path.to_owned(), source: e };
    let malformed = |line: usize, reason: String| TableError::Malformed { path: path.to_owned(), line, reason };

    let reader = BufReader::new(File::open(path).map_err(read_error)?);
    let mut lines = reader.lines();

    let header = lines.next().transpose().map_err(read_error)?
        .ok_or_else(|| malformed(1, "missing header".to_owned()))?;
    let columns: Vec<&str> = header.split(DELIMITER).collect();
    if columns.first() != Some(&ID_COLUMN) {
        return Err(malformed(1, format!("first column must be {}", ID_COLUMN)));
    }
    for (i, column) in columns.iter().enumerate().skip(1) {
        if *column != dim_column(i - 1) {
            return Err(malformed(1, format!("unexpected column {}", column)));
        }
    }
    let dimension = columns.len() - 1;

    let mut table = EmbeddingTable::default();
    for (index, line) in lines.enumerate() {
        let line = line.map_err(read_error)?;
        let line_number = index + 2;
        let mut cells = line.split(DELIMITER);
        let id = cells.next().unwrap_or_default().to_owned();
        let vector = cells
            .map(|cell| cell.parse::<f32>()
                .map_err(|e| malformed(line_number, format!("invalid value {}: {}", cell, e))))
            .collect::<Result<Vec<f32>, TableError>>()?;
        if vector.len() != dimension {
            return Err(malformed(line_number, format!("expected {} values, found {}", dimension, vector.len())));
        }
        table.ids.push(id);
        table.vectors.push(vector);
    }
    Ok(table)
}

/// `image_id` plus every metadata field, built from embedding rows without touching the vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataTable {
    /// Column names, `image_id` first and the metadata keys sorted after it
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MetadataTable {
    pub fn from_rows(rows: &[EmbeddingRow]) -> MetadataTable {
        let keys: BTreeSet<&str> = rows.iter()
            .flat_map(|row| row.metadata.keys().map(String::as_str))
            .collect();

        let columns = std::iter::once(ID_COLUMN.to_owned())
            .chain(keys.iter().map(|k| k.to_string()))
            .collect();
        let rows = rows.iter()
            .map(|row| {
                std::iter::once(row.item_id.clone())
                    .chain(keys.iter().map(|k| row.metadata.get(*k).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect();

        MetadataTable { columns, rows }
    }

    pub fn write_tsv(&self, path: &Utf8Path) -> Result<(), TableError> {
        debug!("Writing {} metadata rows to {}", self.rows.len(), path);
        write_tsv(
            path,
            self.columns.iter().cloned(),
            self.rows.iter().map(|row| row.iter().map(|cell| sanitize_cell(cell))),
        )
    }
}

fn dim_column(i: usize) -> String {
    format!("dim_{}", i)
}

fn sanitize_cell(cell: &str) -> String {
    cell.replace(['\t', '\n', '\r'], " ")
}

fn write_tsv<H, R, C>(path: &Utf8Path, header: H, rows: R) -> Result<(), TableError>
where
    H: IntoIterator<Item = String>,
    R: IntoIterator<Item = C>,
    C: IntoIterator<Item = String>,
{
    let write_error = |e: std::io::Error| TableError::Write { path: path.to_owned(), source: e };
    let mut out = BufWriter::new(File::create(path).map_err(write_error)?);

    write_line(&mut out, header).map_err(write_error)?;
    for row in rows {
        write_line(&mut out, row).map_err(write_error)?;
    }
    out.flush().map_err(write_error)
}

fn write_line<W: Write>(out: &mut W, cells: impl IntoIterator<Item = String>) -> std::io::Result<()> {
    for (i, cell) in cells.into_iter().enumerate() {
        if i > 0 {
            write!(out, "{}", DELIMITER)?;
        }
        out.write_all(cell.as_bytes())?;
    }
    writeln!(out)
}
