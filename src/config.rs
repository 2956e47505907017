//! `contractor.ini`: the single tuning knob the binary honors.
//!
//! `Threads=<N>` caps the worker pool; 0 or an absent file means all
//! available cores.

use std::path::Path;

use log::info;

use crate::error::{PrepareError, Result};

pub const CONFIG_FILE: &str = "contractor.ini";

/// Resolves the worker count from an optional ini file and the machine's
/// core count.
pub fn resolve_thread_count(config_path: &Path, available: usize) -> Result<usize> {
    if !config_path.is_file() {
        return Ok(available);
    }
    let text = std::fs::read_to_string(config_path)?;
    for line in text.lines() {
        let line = line.split(&[';', '#'][..]).next().unwrap_or("").trim();
        let Some(value) = line.strip_prefix("Threads") else {
            continue;
        };
        let Some(value) = value.trim_start().strip_prefix('=') else {
            continue;
        };
        let requested: usize = value.trim().parse().map_err(|_| {
            PrepareError::config("Threads", format!("not a number: {:?}", value.trim()))
        })?;
        let resolved = if requested == 0 || requested > available {
            available
        } else {
            requested
        };
        info!("contractor.ini: Threads={requested} -> using {resolved} workers");
        return Ok(resolved);
    }
    Ok(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn ini(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_uses_all_cores() {
        assert_eq!(
            resolve_thread_count(Path::new("/nonexistent/contractor.ini"), 8).unwrap(),
            8
        );
    }

    #[test]
    fn zero_means_auto() {
        let file = ini("Threads=0\n");
        assert_eq!(resolve_thread_count(file.path(), 8).unwrap(), 8);
    }

    #[test]
    fn explicit_count_is_capped_at_available() {
        let file = ini("Threads=4\n");
        assert_eq!(resolve_thread_count(file.path(), 8).unwrap(), 4);
        let file = ini("Threads=64\n");
        assert_eq!(resolve_thread_count(file.path(), 8).unwrap(), 8);
    }

    #[test]
    fn garbage_names_the_key() {
        let file = ini("Threads=many\n");
        let err = resolve_thread_count(file.path(), 8).unwrap_err();
        assert!(err.to_string().contains("Threads"));
    }
}
