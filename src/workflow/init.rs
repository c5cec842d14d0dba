//! Workflow init step.
//!
//! Init writes the config stub and the directory layout every later step
//! expects.
use super::resolve_root;
use crate::cli::InitArgs;
use crate::config::{config_stub, CONFIG_SCHEMA_VERSION};
use crate::paths::WorkspacePaths;
use anyhow::{anyhow, Context, Result};
use std::fs;

pub fn run_init(args: &InitArgs) -> Result<()> {
    let root = resolve_root(&args.root)?;
    let paths = WorkspacePaths::new(root);
    init_workspace(&paths, args.force)?;
    println!("wrote {}", paths.config_path().display());
    Ok(())
}

pub(crate) fn init_workspace(paths: &WorkspacePaths, force: bool) -> Result<()> {
    let config_path = paths.config_path();
    if config_path.is_file() && !force {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            config_path.display()
        ));
    }
    for dir in [paths.context_dir(), paths.documents_dir(), paths.runs_dir()] {
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let stub = config_stub()?;
    fs::write(&config_path, stub.as_bytes())
        .with_context(|| format!("write {}", config_path.display()))?;
    tracing::info!(
        root = %paths.root().display(),
        schema_version = CONFIG_SCHEMA_VERSION,
        "workspace initialized"
    );
    Ok(())
}

#[cfg(test)]
#[path = "init_tests.rs"]
mod tests;
