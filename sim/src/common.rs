//! Common utility functions for the simulator binary.
//!
//! This module contains:
//! - Logger initialization
//! - Output directory handling
//! - Map path resolution for scenario files

use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

/// Crates whose records follow the requested level; everything else is capped at `warn`.
const LOG_MODULES: [&str; 2] = ["gridloc", "gridloc_sim"];

/// Parse a level name (off, error, warn, info, debug, trace), case-insensitively.
pub fn parse_log_level(log_level: &str) -> Result<log::LevelFilter> {
    match log_level.parse::<log::LevelFilter>() {
        Ok(level) => Ok(level),
        Err(_) => bail!(
            "Invalid log level '{}': expected off, error, warn, info, debug or trace",
            log_level
        ),
    }
}

/// Open `path` for appending, creating it and its parent directories as needed.
fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}

/// Install the global logger.
///
/// The localization library and this binary log at `log_level`; dependencies never go below `warn`, so
/// `--log-level trace` shows per-particle selections without rayon or clap noise. Records carry a local
/// timestamp and their module path.
///
/// # Errors
/// Returns an error for an unknown level, an unopenable log file, or a second initialization.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    use std::io::Write;

    let level = parse_log_level(log_level)?;
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level.min(log::LevelFilter::Warn));
    for module in LOG_MODULES {
        builder.filter_module(module, level);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {} - {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.module_path().unwrap_or("?"),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        let file = open_log_file(log_path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

/// Create the output directory if it does not exist yet.
///
/// # Errors
/// Returns an error if `output` exists but is not a directory, or if creation fails.
pub fn ensure_output_dir(output: &Path) -> Result<()> {
    if output.exists() {
        if !output.is_dir() {
            bail!("Output path '{}' is not a directory.", output.display());
        }
        return Ok(());
    }
    std::fs::create_dir_all(output)?;
    Ok(())
}

/// Resolve a map path named inside a scenario file.
///
/// Relative map paths are taken relative to the directory holding the scenario file, so a scenario and its
/// maps can be moved around together.
pub fn resolve_map_path(config_path: &Path, map: &Path) -> PathBuf {
    if map.is_absolute() {
        return map.to_path_buf();
    }
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(map),
        _ => map.to_path_buf(),
    }
}

/// Validate that an input file exists.
///
/// # Errors
/// Returns an error if the path does not exist or is not a regular file.
pub fn validate_input_file(input: &Path) -> Result<()> {
    if !input.exists() {
        bail!("Input path '{}' does not exist.", input.display());
    }
    if !input.is_file() {
        bail!("Input path '{}' is not a file.", input.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("TRACE").unwrap(), log::LevelFilter::Trace);
        assert_eq!(parse_log_level("off").unwrap(), log::LevelFilter::Off);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_open_log_file_creates_parents_and_appends() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("run.log");
        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_validate_input_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("office.txt");
        File::create(&file_path).unwrap();

        assert!(validate_input_file(&file_path).is_ok());
        assert!(validate_input_file(dir.path()).is_err());
        assert!(validate_input_file(Path::new("/nonexistent/map.txt")).is_err());
    }

    #[test]
    fn test_ensure_output_dir_creates_directory() {
        let dir = tempdir().unwrap();
        let new_dir = dir.path().join("runs").join("first");

        assert!(!new_dir.exists());
        ensure_output_dir(&new_dir).unwrap();
        assert!(new_dir.is_dir());
        // Existing directories are fine
        ensure_output_dir(&new_dir).unwrap();
    }

    #[test]
    fn test_ensure_output_dir_rejects_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("steps.csv");
        File::create(&file_path).unwrap();
        assert!(ensure_output_dir(&file_path).is_err());
    }

    #[test]
    fn test_resolve_map_path() {
        let config = Path::new("scenarios/office.toml");
        assert_eq!(
            resolve_map_path(config, Path::new("../maps/office.txt")),
            PathBuf::from("scenarios/../maps/office.txt")
        );
        assert_eq!(
            resolve_map_path(Path::new("office.toml"), Path::new("maps/office.txt")),
            PathBuf::from("maps/office.txt")
        );
        assert_eq!(
            resolve_map_path(config, Path::new("/srv/maps/office.txt")),
            PathBuf::from("/srv/maps/office.txt")
        );
    }
}
