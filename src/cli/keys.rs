//! Просмотр ключей и импорт ключей OpenSSH

use std::path::PathBuf;

use colored::Colorize;
use tracing::warn;

use crate::config::{KeyringPaths, Settings};
use crate::error::{PgpError, Result};
use crate::keystore::{ssh, KeyRecord, KeyStore, KeyStoreFormat, SshImporter};

use super::{load_keyring, prompt_passphrase, save_keyring};

pub fn list(settings: &Settings, format: Option<KeyStoreFormat>, secret: bool) -> Result<()> {
    let format = format.unwrap_or(settings.keyring_format);

    let store = match format {
        KeyStoreFormat::Ssh => {
            let (pubring, secring) = ssh::load_ssh_keys(settings, secret)?;
            secring.unwrap_or(pubring)
        }
        KeyStoreFormat::Gpg => {
            let paths = KeyringPaths::resolve(settings);
            let path = if secret { &paths.secring } else { &paths.pubring };
            load_keyring(path, settings)?
        }
    };

    if store.is_empty() {
        println!("Ключи не найдены.");
        return Ok(());
    }

    println!();
    println!("{}", format!("=== Ключи ({}) ===", format).cyan().bold());
    println!();
    for record in &store {
        print_record(record);
    }

    Ok(())
}

fn print_record(record: &KeyRecord) {
    let kind = match (record.is_secret(), record.subkey) {
        (false, false) => "pub",
        (false, true) => "sub",
        (true, false) => "sec",
        (true, true) => "ssb",
    };
    let state = if record.is_locked() {
        " [заблокирован]".yellow().to_string()
    } else {
        String::new()
    };

    println!(
        "{} {}/{} {}{}",
        kind.bold(),
        record.algorithm(),
        record.public_material().bits(),
        record.key_id().to_string().cyan(),
        state
    );
    println!("      {}", record.fingerprint().to_string().dimmed());
    for user_id in &record.user_ids {
        println!("uid   {}", user_id);
    }
    println!();
}

/// Импортировать ключи OpenSSH в собственные связки ключей. Файлы, которые
/// не удалось импортировать, сообщаются и пропускаются.
pub fn import_ssh(settings: &Settings, files: &[PathBuf]) -> Result<()> {
    let paths = KeyringPaths::resolve(settings);
    let mut pubring = load_keyring(&paths.pubring, settings)?;
    let mut secring = load_keyring(&paths.secring, settings)?;

    let importer = SshImporter::new(settings.ssh_hash());
    let mut imported = KeyStore::new(settings.ssh_hash());
    let mut failed = 0usize;

    for path in files {
        match importer.import_file(&mut imported, path, settings.max_mem_alloc) {
            Ok(_) => println!("{} {}", "Импортирован:".green(), path.display()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ssh import failed");
                println!("{} {}: {}", "Пропущен:".yellow(), path.display(), e);
                failed += 1;
            }
        }
    }

    if imported.is_empty() {
        return Err(PgpError::FormatError("no keys imported".into()));
    }

    let mut has_secret = false;
    for record in &imported {
        pubring.append(record.to_public());
        if record.is_secret() {
            secring.append(record.clone());
            has_secret = true;
        }
    }

    save_keyring(&paths.pubring, &pubring)?;
    if has_secret {
        save_keyring(&paths.secring, &secring)?;
    }

    println!();
    println!(
        "Импортировано ключей: {}, пропущено файлов: {}",
        imported.len().to_string().green(),
        failed
    );
    println!("Связка ключей: {}", paths.pubring.display().to_string().cyan());

    Ok(())
}

/// Проверить парольную фразу, разблокировав первый подходящий секретный ключ
pub fn check_passphrase(settings: &Settings, name: &str) -> Result<()> {
    let paths = KeyringPaths::resolve(settings);
    let mut secring = load_keyring(&paths.secring, settings)?;

    let record = secring
        .find_by_name_mut(name)
        .ok_or_else(|| PgpError::InvalidKey(format!("no secret key matches '{}'", name)))?;

    if !record.is_locked() {
        println!("Ключ {} не защищён парольной фразой.", record.key_id().to_string().cyan());
        return Ok(());
    }

    let passphrase = prompt_passphrase(&record.key_id().to_string())?;
    record.unlock(&passphrase)?;
    println!("{} ключ {} разблокирован", "Готово:".green(), record.key_id().to_string().cyan());

    Ok(())
}
