//! CLI tool for chunkwise table stores: create tables, bulk-load CSV,
//! compress chunks and scan them back in order.

mod error;
mod parse;

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::DateTime;
use clap::{Parser, Subcommand};
use snafu::ResultExt;

use chunkwise_core::catalog::{ChunkId, ColumnCompression, CompressionSettings, TableId};
use chunkwise_core::formats::convert::{arrow_schema, batch_to_rows};
use chunkwise_core::planner::OrderByRequest;
use chunkwise_core::scan::ExecOptions;
use chunkwise_core::storage::TableLocation;
use chunkwise_core::table::ChunkStore;
use chunkwise_core::value::{Cell, Datum, RowSchema};

use crate::error::{
    CliError, CliResult, CsvDecodeSnafu, CsvOpenSnafu, CsvRowsSnafu, ScanSnafu, SpecSnafu,
    StoreSnafu,
};

#[derive(Debug, Parser)]
#[command(name = "chunkwise", about = "Compressed time-series chunk store")]
struct Cli {
    /// Root directory of the table store.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize an empty store at the root.
    Init,

    /// Create a table.
    CreateTable {
        /// Table name.
        #[arg(long)]
        name: String,
        /// Column list, e.g. 'ts:timestamp,device:text,reading:float64'.
        #[arg(long)]
        columns: String,
        /// Partitioning time column.
        #[arg(long)]
        time_column: String,
        /// Chunk width, e.g. '1h' or '1d'.
        #[arg(long, default_value = "1d")]
        chunk_interval: String,
        /// Segment-by columns, comma separated.
        #[arg(long)]
        segment_by: Option<String>,
        /// Compression order, e.g. 'ts desc' or 'ts desc,reading asc'.
        #[arg(long)]
        order_by: Option<String>,
    },

    /// Bulk-load a CSV file (with header) into a table.
    Copy {
        /// Target table name.
        #[arg(long)]
        table: String,
        /// CSV file path.
        #[arg(long)]
        csv: PathBuf,
    },

    /// List a table's chunks.
    Chunks {
        /// Table name.
        #[arg(long)]
        table: String,
    },

    /// Compress staged chunks into segment files.
    Compress {
        /// Table name.
        #[arg(long)]
        table: String,
        /// Compress only this chunk id; all uncompressed chunks otherwise.
        #[arg(long)]
        chunk: Option<u32>,
    },

    /// Scan a compressed chunk and print its rows as CSV.
    Scan {
        /// Table name.
        #[arg(long)]
        table: String,
        /// Chunk id.
        #[arg(long)]
        chunk: u32,
        /// Requested output order, e.g. 'ts desc'.
        #[arg(long)]
        order_by: Option<String>,
        /// Stop after this many rows.
        #[arg(long)]
        limit: Option<usize>,
        /// Print the operator properties before the rows.
        #[arg(long)]
        explain: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let root = cli.root.display().to_string();
    let location = TableLocation::local(&cli.root);

    match cli.command {
        Command::Init => {
            ChunkStore::create(location)
                .await
                .context(StoreSnafu { root: root.clone() })?;
            println!("initialized store at {root}");
            Ok(())
        }
        Command::CreateTable {
            name,
            columns,
            time_column,
            chunk_interval,
            segment_by,
            order_by,
        } => {
            let schema = parse::parse_columns(&columns).context(SpecSnafu { what: "columns" })?;
            let interval = parse::parse_interval(&chunk_interval)
                .context(SpecSnafu { what: "chunk interval" })?;
            let compression = build_compression(segment_by.as_deref(), order_by.as_deref())?;

            let mut store = ChunkStore::open(location)
                .await
                .context(StoreSnafu { root: root.clone() })?;
            let table_id = store
                .create_table(&name, schema, &time_column, interval, compression)
                .await
                .context(StoreSnafu { root: root.clone() })?;
            println!("created table {name} (id {table_id})");
            Ok(())
        }
        Command::Copy { table, csv } => {
            let mut store = ChunkStore::open(location)
                .await
                .context(StoreSnafu { root: root.clone() })?;
            let (table_id, schema) = resolve_table(&store, &table)?;

            let rows = read_csv_rows(&csv, &schema)?;
            let ingested = store
                .ingest_rows(table_id, rows)
                .await
                .context(StoreSnafu { root: root.clone() })?;
            println!("copied {ingested} rows into {table}");
            Ok(())
        }
        Command::Chunks { table } => {
            let store = ChunkStore::open(location)
                .await
                .context(StoreSnafu { root: root.clone() })?;
            let (table_id, _) = resolve_table(&store, &table)?;

            for chunk in store
                .catalog()
                .chunks(table_id)
                .map_err(|_| CliError::UnknownTable { name: table.clone() })?
            {
                let start = format_micros(chunk.range.start_micros);
                let end = format_micros(chunk.range.end_micros);
                let state = if chunk.is_compressed() {
                    "compressed"
                } else {
                    "staged"
                };
                let staged = store.staged_row_count(table_id, chunk.chunk_id);
                println!(
                    "chunk {}: [{start}, {end}) {state}, {staged} staged rows",
                    chunk.chunk_id
                );
            }
            Ok(())
        }
        Command::Compress { table, chunk } => {
            let mut store = ChunkStore::open(location)
                .await
                .context(StoreSnafu { root: root.clone() })?;
            let (table_id, _) = resolve_table(&store, &table)?;

            let targets: Vec<ChunkId> = match chunk {
                Some(id) => vec![resolve_chunk(&store, table_id, &table, id)?],
                None => store
                    .catalog()
                    .chunks(table_id)
                    .map_err(|_| CliError::UnknownTable { name: table.clone() })?
                    .iter()
                    .filter(|c| !c.is_compressed())
                    .map(|c| c.chunk_id)
                    .collect(),
            };

            for chunk_id in targets {
                let segments = store
                    .compress_chunk(table_id, chunk_id)
                    .await
                    .context(StoreSnafu { root: root.clone() })?;
                println!("compressed chunk {chunk_id} into {segments} segments");
            }
            Ok(())
        }
        Command::Scan {
            table,
            chunk,
            order_by,
            limit,
            explain,
        } => {
            let store = ChunkStore::open(location)
                .await
                .context(StoreSnafu { root: root.clone() })?;
            let (table_id, schema) = resolve_table(&store, &table)?;
            let chunk_id = resolve_chunk(&store, table_id, &table, chunk)?;

            let order: Vec<OrderByRequest> = match order_by.as_deref() {
                Some(spec) => {
                    parse::parse_order_list(spec).context(SpecSnafu { what: "order" })?
                }
                None => Vec::new(),
            };

            let mut scan = store
                .scan_chunk(table_id, chunk_id, &order, None, ExecOptions::default())
                .await
                .context(StoreSnafu { root: root.clone() })?;

            if explain {
                println!("{}", scan.explain());
            }
            let header: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
            println!("{}", header.join(","));

            let mut emitted = 0usize;
            while let Some(row) = scan.next_row().context(ScanSnafu)? {
                let line: Vec<String> = row.iter().map(format_cell).collect();
                println!("{}", line.join(","));
                emitted += 1;
                if limit.is_some_and(|l| emitted >= l) {
                    break;
                }
            }
            scan.end();
            Ok(())
        }
    }
}

fn build_compression(
    segment_by: Option<&str>,
    order_by: Option<&str>,
) -> CliResult<CompressionSettings> {
    let mut columns = Vec::new();
    if let Some(spec) = segment_by {
        for (i, name) in spec.split(',').map(str::trim).enumerate() {
            columns.push(ColumnCompression::segmentby(name, i as u16 + 1));
        }
    }
    if let Some(spec) = order_by {
        let requests = parse::parse_order_list(spec).context(SpecSnafu { what: "order" })?;
        for (i, request) in requests.into_iter().enumerate() {
            columns.push(ColumnCompression::orderby(
                request.column,
                i as u16 + 1,
                matches!(
                    request.direction,
                    chunkwise_core::scan::sort::SortDirection::Asc
                ),
                request.nulls_first,
            ));
        }
    }
    Ok(CompressionSettings::new(columns))
}

fn resolve_table(store: &ChunkStore, name: &str) -> CliResult<(TableId, RowSchema)> {
    let entry = store
        .catalog()
        .table_by_name(name)
        .map_err(|_| CliError::UnknownTable {
            name: name.to_string(),
        })?;
    Ok((entry.meta.table_id, entry.meta.schema.clone()))
}

fn resolve_chunk(
    store: &ChunkStore,
    table_id: TableId,
    table: &str,
    chunk: u32,
) -> CliResult<ChunkId> {
    store
        .catalog()
        .chunk(table_id, ChunkId(chunk))
        .map(|c| c.chunk_id)
        .map_err(|_| CliError::UnknownChunk {
            name: table.to_string(),
            chunk,
        })
}

fn read_csv_rows(path: &PathBuf, schema: &RowSchema) -> CliResult<Vec<chunkwise_core::value::Row>> {
    let file = File::open(path).context(CsvOpenSnafu {
        path: path.display().to_string(),
    })?;
    let reader = arrow::csv::ReaderBuilder::new(arrow_schema(schema))
        .with_header(true)
        .build(file)
        .context(CsvDecodeSnafu {
            path: path.display().to_string(),
        })?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context(CsvDecodeSnafu {
            path: path.display().to_string(),
        })?;
        rows.extend(batch_to_rows(schema, &batch).context(CsvRowsSnafu)?);
    }
    Ok(rows)
}

fn format_micros(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc().to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn format_cell(cell: &Cell) -> String {
    match cell {
        None => String::new(),
        Some(Datum::Bool(v)) => v.to_string(),
        Some(Datum::Int32(v)) => v.to_string(),
        Some(Datum::Int64(v)) => v.to_string(),
        Some(Datum::Float64(v)) => v.to_string(),
        Some(Datum::Timestamp(v)) => format_micros(*v),
        Some(Datum::Text(v)) => v.to_string(),
        Some(Datum::Bytes(v)) => {
            let mut out = String::from("\\x");
            for byte in v.iter() {
                out.push_str(&format!("{byte:02x}"));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_spec_builds_indexed_columns() {
        let settings =
            build_compression(Some("device,site"), Some("ts desc")).expect("settings");
        assert!(settings.is_segmentby("device"));
        assert!(settings.is_segmentby("site"));
        assert!(!settings.is_segmentby("ts"));
        let orderby = settings.orderby_columns();
        assert_eq!(orderby.len(), 1);
        assert_eq!(orderby[0].column, "ts");
        assert!(!orderby[0].orderby_asc);
        assert!(orderby[0].orderby_nulls_first);
    }

    #[test]
    fn cells_format_for_csv_output() {
        assert_eq!(format_cell(&None), "");
        assert_eq!(format_cell(&Some(Datum::Int64(5))), "5");
        assert_eq!(
            format_cell(&Some(Datum::Timestamp(1_000_000))),
            "1970-01-01 00:00:01"
        );
        assert_eq!(
            format_cell(&Some(Datum::Bytes(bytes::Bytes::from_static(b"\x01\xff")))),
            "\\x01ff"
        );
    }
}
