//! File-format drivers. The engine never sees a path; everything here turns
//! files into core values and core outputs back into files.

pub mod raster;
pub mod table;
pub mod vector;

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Refuse to clobber an existing output unless `overwrite` is set; create the
/// parent directory otherwise.
pub fn prepare_output(path: &Path, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        bail!("{} already exists (pass --overwrite to replace it)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    Ok(())
}

pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_output_needs_overwrite() {
        let dir = std::env::temp_dir().join(format!("polopt-carbon-io-{}", std::process::id()));
        let file = dir.join("nested").join("out.csv");
        prepare_output(&file, false).unwrap();
        assert!(file.parent().unwrap().is_dir());

        fs::write(&file, "x").unwrap();
        let err = prepare_output(&file, false).unwrap_err();
        assert!(err.to_string().contains("--overwrite"), "{err}");
        prepare_output(&file, true).unwrap();
        fs::remove_dir_all(&dir).unwrap();
    }
}
