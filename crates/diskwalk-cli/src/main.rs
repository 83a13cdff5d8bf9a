use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use diskwalk_core::{
	list_files, list_partitions, FileQuery, FileRecord, PartitionQuery, PartitionRecord, RawBackend,
	WalkConfig,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "diskwalk", version, about = "List partitions and files of forensic disk images")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
	/// Output format
	#[arg(long, value_enum, global = true, default_value = "table")]
	format: Format,
	/// Walk configuration file (JSON)
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// Directory descents allowed per walk; overrides the config file
	#[arg(long, global = true)]
	max_descents: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// List the partitions of one or more devices
	Partitions {
		/// Device or image paths
		#[arg(required = true)]
		devices: Vec<String>,
	},
	/// List files of one partition
	Files {
		/// Device or image path (repeatable)
		#[arg(long = "device")]
		devices: Vec<String>,
		/// Partition address; exactly one is expected
		#[arg(long = "partition")]
		partitions: Vec<String>,
		/// Only this path (repeatable)
		#[arg(long = "path")]
		paths: Vec<String>,
		/// Only this inode address (repeatable)
		#[arg(long = "inode")]
		inodes: Vec<String>,
	},
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
	Json,
	Table,
}

fn main() -> Result<()> {
	// Initialize tracing; records go to stdout, diagnostics to stderr
	tracing_subscriber::fmt().with_writer(std::io::stderr).init();

	let cli = Cli::parse();
	let mut config = match &cli.config {
		Some(path) => WalkConfig::from_json_file(path)?,
		None => WalkConfig::default(),
	};
	if let Some(max_descents) = cli.max_descents {
		config.max_descents = max_descents;
	}
	tracing::debug!("Walk config: {:?}", config);

	let backend = RawBackend::new();
	match cli.command {
		Commands::Partitions { devices } => {
			let query = PartitionQuery { devices: devices.into_iter().collect() };
			let records = list_partitions(&backend, &query);
			match cli.format {
				Format::Json => print_json(&records)?,
				Format::Table => print_partitions(&records),
			}
		}
		Commands::Files { devices, partitions, paths, inodes } => {
			let query = FileQuery {
				devices: to_set(devices),
				partitions: to_set(partitions),
				paths: to_set(paths),
				inodes: to_set(inodes),
			};
			let records = list_files(&backend, &query, &config);
			match cli.format {
				Format::Json => print_json(&records)?,
				Format::Table => print_files(&records),
			}
		}
	}
	Ok(())
}

fn to_set(values: Vec<String>) -> BTreeSet<String> {
	values.into_iter().collect()
}

/// One JSON object per line
fn print_json<T: Serialize>(records: &[T]) -> Result<()> {
	for record in records {
		println!("{}", serde_json::to_string(record)?);
	}
	Ok(())
}

fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
	let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
	for row in &rows {
		for (width, cell) in widths.iter_mut().zip(row) {
			*width = (*width).max(cell.chars().count());
		}
	}

	let line = |cells: Vec<String>| {
		let padded: Vec<String> = cells
			.iter()
			.zip(&widths)
			.map(|(cell, width)| format!("{:<width$}", cell, width = *width))
			.collect();
		println!("{}", padded.join("  ").trim_end());
	};

	line(header.iter().map(|h| h.to_string()).collect());
	for row in rows {
		line(row);
	}
}

fn print_partitions(records: &[PartitionRecord]) {
	let rows = records
		.iter()
		.map(|r| {
			vec![
				r.device.clone(),
				r.partition.to_string(),
				r.partition_type.clone(),
				r.label.clone().unwrap_or_default(),
				format!("0x{:x}", r.flags),
				r.offset.to_string(),
				r.blocks_size.to_string(),
				r.blocks.to_string(),
				r.inodes.to_string(),
			]
		})
		.collect();
	print_table(
		&["DEVICE", "PARTITION", "TYPE", "LABEL", "FLAGS", "OFFSET", "BLOCK SIZE", "BLOCKS", "INODES"],
		rows,
	);
	eprintln!("📊 {} partitions", records.len());
}

fn print_files(records: &[FileRecord]) {
	fn opt<T: ToString>(value: &Option<T>) -> String {
		value.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".to_string())
	}

	let rows = records
		.iter()
		.map(|r| {
			vec![
				opt(&r.inode),
				opt(&r.file_type),
				opt(&r.mode),
				opt(&r.uid),
				opt(&r.gid),
				opt(&r.size),
				opt(&r.mtime),
				r.path.clone(),
			]
		})
		.collect();
	print_table(&["INODE", "TYPE", "MODE", "UID", "GID", "SIZE", "MTIME", "PATH"], rows);
	eprintln!("📁 {} files", records.len());
}
