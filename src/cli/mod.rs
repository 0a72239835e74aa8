//! Реализация CLI команд

pub mod digest;
pub mod keygen;
pub mod keys;

use std::path::Path;

use colored::Colorize;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{self, Settings};
use crate::error::Result;
use crate::keystore::{KeyStore, KeyStoreFormat};

/// Запросить новую парольную фразу с подтверждением; пустая допустима
pub fn prompt_new_passphrase() -> Result<SecretString> {
    println!("Парольная фраза шифрует секретный ключ на диске.");
    println!("Оставьте пустой, чтобы ключ можно было использовать без пароля.\n");

    loop {
        let passphrase = SecretString::new(rpassword::prompt_password("Введите парольную фразу: ")?);
        let confirm = SecretString::new(rpassword::prompt_password("Подтвердите парольную фразу: ")?);

        if passphrase.expose_secret() != confirm.expose_secret() {
            println!("{} Парольные фразы не совпадают", "Ошибка:".red());
            continue;
        }

        return Ok(passphrase);
    }
}

/// Запросить существующую парольную фразу
pub fn prompt_passphrase(key_id: &str) -> Result<SecretString> {
    let passphrase = rpassword::prompt_password(format!("Парольная фраза для ключа {}: ", key_id))?;
    Ok(SecretString::new(passphrase))
}

/// Загрузить связку ключей; отсутствующий файл даёт пустое хранилище
fn load_keyring(path: &Path, settings: &Settings) -> Result<KeyStore> {
    if !path.exists() {
        return Ok(KeyStore::default());
    }
    KeyStore::load_from_file(KeyStoreFormat::Gpg, path, settings.hash, settings.max_mem_alloc)
}

fn save_keyring(path: &Path, store: &KeyStore) -> Result<()> {
    config::write_private(path, &store.to_bytes()?)
}
