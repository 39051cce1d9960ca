use anyhow::{Context, Result};
use walbridge_core::{format_lsn, parse_lsn};

/// Convert an LSN between its `X/Y` text form and its integer value.
pub fn cmd_lsn(value: &str) -> Result<()> {
    println!("{}", convert(value)?);
    Ok(())
}

fn convert(value: &str) -> Result<String> {
    let value = value.trim();
    if value.contains('/') {
        let lsn = parse_lsn(value).with_context(|| format!("Invalid LSN: {}", value))?;
        Ok(lsn.to_string())
    } else {
        let lsn: u64 = value
            .parse()
            .with_context(|| format!("Invalid LSN: {}", value))?;
        Ok(format_lsn(lsn))
    }
}
