use std::path::Path;

use anyhow::{Context, Result};

use crate::offsets::FileOffsetStore;

pub fn cmd_offsets(path: &Path) -> Result<()> {
    let store = FileOffsetStore::new(path);
    let offsets = store
        .load_all()
        .with_context(|| format!("Failed to read offsets from {}", path.display()))?;

    if offsets.is_empty() {
        println!("No offsets stored. Run 'walbridge run' to start capturing.");
        return Ok(());
    }

    println!("\nStored Offsets:");
    println!(
        "{:<24} {:>18} {:>10} {:>10}",
        "Server", "LSN", "TxId", "Snapshot"
    );
    println!("{:-<65}", "");

    for (server, offset) in offsets {
        let snapshot = match (offset.snapshot, offset.last_snapshot_record) {
            (false, _) => "-",
            (true, false) => "running",
            (true, true) => "done",
        };
        println!(
            "{:<24} {:>18} {:>10} {:>10}",
            server,
            offset.lsn.to_string(),
            offset
                .txid
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            snapshot
        );
    }

    println!();
    Ok(())
}
