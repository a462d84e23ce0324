//! The `info` subcommand: inspect a cache file.
//!
//! Works on partially valid blobs: each section is reported or its
//! failure recorded, and the exit code reflects whether the whole file
//! parsed cleanly.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use strata_blob::CacheBlobInfo;
use strata_cli::uuid_to_hex_string;
use strata_common::CacheId;
use tracing::warn;

use crate::InfoArgs;

#[derive(Serialize)]
struct PublicReport {
    header_length: u32,
    header_version: u32,
    vendor_id: String,
    device_id: String,
    uuid: String,
    trailing_space_before_private_blob: usize,
}

#[derive(Serialize)]
struct PrivateReport {
    blob_format: u32,
    digest: String,
    content_blob_size: usize,
}

#[derive(Serialize)]
struct EntryReport {
    index: usize,
    offset: usize,
    hash_id: String,
    data_size: u64,
    checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_elf: Option<String>,
}

#[derive(Serialize)]
struct Report {
    file: String,
    file_size: usize,
    public_header: Option<PublicReport>,
    private_header: Option<PrivateReport>,
    entries: Vec<EntryReport>,
    errors: Vec<String>,
}

pub fn run(args: &InfoArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let blob = fs::read(&args.file)
        .map_err(|e| format!("cannot read {}: {e}", args.file.display()))?;
    let info = CacheBlobInfo::new(&blob)?;

    let sources = match &args.elf_source_dir {
        Some(dir) => checksum_index(dir)?,
        None => HashMap::new(),
    };

    let mut report = Report {
        file: args.file.display().to_string(),
        file_size: blob.len(),
        public_header: None,
        private_header: None,
        entries: Vec::new(),
        errors: Vec::new(),
    };

    match info.public_header_info() {
        Ok(public) => {
            report.public_header = Some(PublicReport {
                header_length: public.header.header_length,
                header_version: public.header.header_version,
                vendor_id: format!("0x{:04x}", public.header.vendor_id),
                device_id: format!("0x{:04x}", public.header.device_id),
                uuid: uuid_to_hex_string(&public.header.uuid),
                trailing_space_before_private_blob: public.trailing_space_before_private_blob,
            });
        }
        Err(e) => report.errors.push(format!("public header: {e}")),
    }

    match info.private_header_info() {
        Ok(private) => {
            report.private_header = Some(PrivateReport {
                blob_format: private.header.blob_format,
                digest: hex::encode(private.header.hash_id),
                content_blob_size: private.content_blob_size,
            });
        }
        Err(e) => report.errors.push(format!("private header: {e}")),
    }

    match info.entries_info() {
        Ok(entries) => {
            for entry in entries {
                report.entries.push(EntryReport {
                    index: entry.index,
                    offset: entry.offset,
                    hash_id: entry.header.hash_id.to_string(),
                    data_size: entry.header.data_size,
                    checksum: entry.checksum.to_string(),
                    source_elf: sources
                        .get(&entry.checksum)
                        .map(|path| path.display().to_string()),
                });
            }
        }
        Err(e) => report.errors.push(format!("entries: {e}")),
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(if report.errors.is_empty() { 0 } else { 1 })
}

/// Indexes the binaries in `dir` by content checksum.
///
/// Entry payloads are source binaries verbatim, so an entry's checksum
/// matches the checksum of the file it was created from.
fn checksum_index(
    dir: &PathBuf,
) -> Result<HashMap<CacheId, PathBuf>, Box<dyn std::error::Error>> {
    let mut index = HashMap::new();
    let entries =
        fs::read_dir(dir).map_err(|e| format!("cannot read {}: {e}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match fs::read(&path) {
            Ok(data) => {
                index.insert(CacheId::from_contents(&data), path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    Ok(index)
}

fn print_text(report: &Report) {
    println!("{} ({} bytes)", report.file, report.file_size);

    if let Some(public) = &report.public_header {
        println!("public header:");
        println!("  header length:  {}", public.header_length);
        println!("  header version: {}", public.header_version);
        println!("  vendor id:      {}", public.vendor_id);
        println!("  device id:      {}", public.device_id);
        println!("  uuid:           {}", public.uuid);
        println!(
            "  reserved space: {} bytes",
            public.trailing_space_before_private_blob
        );
    }
    if let Some(private) = &report.private_header {
        println!("private header:");
        println!("  blob format:  {}", private.blob_format);
        println!("  digest:       {}", private.digest);
        println!("  content size: {} bytes", private.content_blob_size);
    }

    println!("entries: {}", report.entries.len());
    for entry in &report.entries {
        println!(
            "  [{}] id {} offset {} size {} checksum {}",
            entry.index, entry.hash_id, entry.offset, entry.data_size, entry.checksum
        );
        if let Some(source) = &entry.source_elf {
            println!("       source {source}");
        }
    }

    for error in &report.errors {
        println!("error: {error}");
    }
}
