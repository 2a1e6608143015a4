use std::io;

use arrow::error::ArrowError;
use chunkwise_core::table::ChunkStoreError;
use snafu::Snafu;

use crate::parse::ParseError;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Invalid {what}: {source}"))]
    Spec {
        what: &'static str,
        source: ParseError,
    },

    #[snafu(display(
        "Store operation failed at {root}: {source}. \
         Ensure the directory holds a chunkwise store (run 'chunkwise init' first)."
    ))]
    Store {
        root: String,
        #[snafu(source(from(ChunkStoreError, Box::new)))]
        source: Box<ChunkStoreError>,
    },

    #[snafu(display("Cannot read CSV file {path}: {source}"))]
    CsvOpen { path: String, source: io::Error },

    #[snafu(display("CSV decode error in {path}: {source}"))]
    CsvDecode { path: String, source: ArrowError },

    #[snafu(display("CSV rows do not match the table schema: {source}"))]
    CsvRows {
        source: chunkwise_core::formats::FormatError,
    },

    #[snafu(display("Scan failed: {source}"))]
    Scan {
        source: chunkwise_core::scan::ScanError,
    },

    #[snafu(display("Unknown table {name}"))]
    UnknownTable { name: String },

    #[snafu(display("Table {name} has no chunk {chunk}"))]
    UnknownChunk { name: String, chunk: u32 },
}
