//! The `create` subcommand: build a cache file from pipeline binaries.

use std::fs;

use strata_cli::{anticipated_cache_file_size, parse_uuid, RelocatableCacheCreator};
use tracing::debug;

use crate::CreateArgs;

pub fn run(args: &CreateArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let uuid = parse_uuid(&args.uuid)
        .ok_or_else(|| format!("`{}` is not a canonical hyphenated UUID", args.uuid))?;
    let fingerprint = hex::decode(&args.fingerprint)
        .map_err(|e| format!("`{}` is not valid fingerprint hex: {e}", args.fingerprint))?;

    let mut binaries = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let data =
            fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        debug!(path = %path.display(), size = data.len(), "read input binary");
        binaries.push(data);
    }

    let sizes: Vec<usize> = binaries.iter().map(|b| b.len()).collect();
    let mut out = vec![0u8; anticipated_cache_file_size(&sizes)];
    let mut creator =
        RelocatableCacheCreator::new(args.device_id, uuid, &fingerprint, &mut out)?;
    for (path, data) in args.inputs.iter().zip(&binaries) {
        creator
            .add_elf(data)
            .map_err(|e| format!("{}: {e}", path.display()))?;
    }
    let (entries, total) = creator.finalize()?;
    out.truncate(total);

    fs::write(&args.output, &out)
        .map_err(|e| format!("cannot write {}: {e}", args.output.display()))?;
    println!(
        "wrote {entries} entries ({total} bytes) to {}",
        args.output.display()
    );
    Ok(0)
}
