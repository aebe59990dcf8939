use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use directories::ProjectDirs;
use tracing::info;

const APP_NAME: &str = "reelgen";

/// Explicit directory if given, otherwise the platform data directory.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }

    let proj_dirs = ProjectDirs::from("", "", APP_NAME)
        .ok_or_else(|| anyhow!("Could not determine home directory, set REELGEN_DATA_DIR"))?;
    Ok(proj_dirs.data_dir().to_path_buf())
}

pub fn ensure_dir(dir: &Path) -> anyhow::Result<()> {
    if !dir.exists() {
        info!("📂 Creating {}", dir.display());
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(PathBuf::from("/srv/reelgen"))).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/reelgen"));
    }

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b/c");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}
