//! Генерация нового ключа RSA в собственной связке ключей

use std::io::Write;

use colored::Colorize;
use secrecy::ExposeSecret;

use crate::config::{local_hostname, KeyringPaths, Settings};
use crate::error::Result;
use crate::keystore::KeyRecord;

use super::{load_keyring, prompt_new_passphrase, save_keyring};

const DEFAULT_EXPONENT: u64 = 65537;

pub fn run(settings: &Settings, bits: usize, user_id: Option<String>) -> Result<()> {
    println!("{}", "=== Генерация ключа ===".cyan().bold());
    println!();

    let user_id = user_id
        .or_else(|| settings.user_id.clone())
        .unwrap_or_else(default_user_id);

    let passphrase = prompt_new_passphrase()?;
    println!();

    print!("{}", format!("Генерация ключа RSA-{} (это займёт некоторое время)... ", bits).cyan());
    std::io::stdout().flush()?;

    let mut record = KeyRecord::generate_rsa(
        bits,
        DEFAULT_EXPONENT,
        &user_id,
        settings.cipher,
        settings.hash,
    )?;
    if !passphrase.expose_secret().is_empty() {
        record.protect(settings.cipher, settings.hash, &passphrase)?;
    }
    println!("{}", "готово".green());

    print!("{}", "Сохранение связки ключей... ".cyan());
    std::io::stdout().flush()?;

    let paths = KeyringPaths::resolve(settings);
    let mut pubring = load_keyring(&paths.pubring, settings)?;
    let mut secring = load_keyring(&paths.secring, settings)?;
    pubring.append(record.to_public());
    secring.append(record.clone());
    save_keyring(&paths.pubring, &pubring)?;
    save_keyring(&paths.secring, &secring)?;
    println!("{}", "готово".green());

    println!();
    println!("{} {}", "Ключ:".bold(), record.key_id().to_string().cyan());
    println!("{} {}", "Отпечаток:".bold(), record.fingerprint());
    println!("{} {}", "Пользователь:".bold(), user_id);
    println!();
    println!("Публичная связка: {}", paths.pubring.display().to_string().cyan());
    println!("Секретная связка: {}", paths.secring.display().to_string().cyan());

    Ok(())
}

fn default_user_id() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string());
    format!("{}@{}", user, local_hostname())
}
