//! `cmp config init`: Write a default `cmp.toml` and the project layout.

use cmp_config::{AppConfig, CONFIG_FILE};
use std::path::{Path, PathBuf};
use tracing::info;

/// Project directories created next to the config file.
const PROJECT_DIRS: &[&str] = &["contexts", "prompts", "memory"];

pub async fn init(root: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    match write_default(root, force)? {
        Some(path) => {
            println!("Created {}", path.display());
            println!("Next: add a context under contexts/ and run `cmp serve`.");
        }
        None => {
            println!(
                "Config already exists at {}; pass --force to overwrite.",
                root.join(CONFIG_FILE).display()
            );
        }
    }
    Ok(())
}

/// Write the default config unless one exists and `force` is off. Returns
/// the written path.
fn write_default(root: &Path, force: bool) -> std::io::Result<Option<PathBuf>> {
    for dir in PROJECT_DIRS {
        std::fs::create_dir_all(root.join(dir))?;
    }

    let path = root.join(CONFIG_FILE);
    if path.exists() && !force {
        return Ok(None);
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    info!(path = %path.display(), "Wrote default config");
    Ok(Some(path))
}
