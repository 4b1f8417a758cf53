use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Load `.env` (or `.env.{env}`) from the current directory or the closest
/// ancestor that has one.
///
/// A missing default `.env` is fine: settings may come from the process
/// environment. A missing named environment file is an error.
pub fn load_dotenv(env: Option<&str>) -> Result<Option<PathBuf>> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let file_name = match env {
        Some(name) => format!(".env.{}", name),
        None => ".env".to_string(),
    };

    match find_in_ancestors(&cwd, &file_name) {
        Some(path) => {
            dotenvy::from_path(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            Ok(Some(path))
        }
        None if env.is_some() => anyhow::bail!(
            "No {} file found.\n\nSearched from {} to filesystem root.",
            file_name,
            cwd.display()
        ),
        None => Ok(None),
    }
}

fn find_in_ancestors(start: &Path, file_name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}
