//! Check-options command implementation.

use super::CommandResult;
use fieldsync_engine::{SyncConfig, SyncOptions};
use std::path::Path;

/// Parses and validates an options file into the effective configuration.
pub fn check(file: &Path) -> CommandResult<SyncConfig> {
    let options = SyncOptions::from_path(file)?;
    Ok(options.into_config()?)
}

/// Runs the check-options command.
pub fn run(file: &Path) -> CommandResult<()> {
    let config = check(file)?;

    println!("Options OK: {:?}", file);
    println!();
    println!("Effective configuration:");
    println!("  Max attempts:      {}", config.retry.max_attempts);
    println!("  Initial backoff:   {:?}", config.retry.initial_delay);
    println!("  Backoff cap:       {:?}", config.retry.max_delay);
    println!("  Backoff factor:    {}", config.retry.backoff_multiplier);
    println!("  Transport timeout: {:?}", config.transport_timeout);
    println!("  Conflict policy:   {:?}", config.conflict_policy);
    Ok(())
}
