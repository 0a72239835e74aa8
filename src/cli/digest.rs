//! Хеширование файлов или stdin

use std::path::PathBuf;

use colored::Colorize;

use crate::config::{self, Settings};
use crate::crypto::{hash, HashAlgorithm};
use crate::error::Result;

pub fn run(settings: &Settings, algorithm: Option<HashAlgorithm>, files: &[PathBuf]) -> Result<()> {
    let algorithm = algorithm.unwrap_or(settings.hash);

    if files.is_empty() {
        let data = config::read_stdin_bounded(settings.max_mem_alloc)?;
        let digest = hash::digest(algorithm, &data)?;
        println!("{}", hex::encode(digest));
        return Ok(());
    }

    for path in files {
        let data = config::read_bounded(path, settings.max_mem_alloc)?;
        let digest = hash::digest(algorithm, &data)?;
        println!(
            "{} ({}) = {}",
            algorithm.name(),
            path.display().to_string().cyan(),
            hex::encode(digest)
        );
    }

    Ok(())
}
