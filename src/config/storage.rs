//! Файловый ввод-вывод с ограничением размера
//!
//! Любое чтение ограничено `Settings::max_mem_alloc` до выделения памяти.
//! Связки ключей записываются с правами только для владельца.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PgpError, Result};

use super::Settings;

const DEFAULT_SSH_KEY: &str = "id_rsa.pub";
const PUB_SUFFIX: &str = ".pub";
const PUBRING: &str = "pubring.gpg";
const SECRING: &str = "secring.gpg";

fn read_capped(reader: impl Read, limit: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut data)?;
    if data.len() > limit {
        return Err(PgpError::AllocationFailure(data.len()));
    }
    Ok(data)
}

/// Прочитать файл целиком, не превышая `limit` байт
pub fn read_bounded(path: &Path, limit: usize) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    if size > limit as u64 {
        return Err(PgpError::AllocationFailure(size as usize));
    }
    debug!(path = %path.display(), size, "reading file");
    read_capped(file, limit)
}

/// Прочитать stdin до EOF, не превышая `limit` байт
pub fn read_stdin_bounded(limit: usize) -> Result<Vec<u8>> {
    read_capped(io::stdin().lock(), limit)
}

/// Записать `data` с правами только для владельца
pub fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;

    // Ограничить права доступа в Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Публичная и секретная части пары ключей OpenSSH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKeyPaths {
    pub public: PathBuf,
    pub secret: PathBuf,
}

impl SshKeyPaths {
    /// По умолчанию `<homedir>/id_rsa.pub`; к заданному имени добавляется
    /// `.pub`, если его нет. Секретный файл: публичный путь без `.pub`.
    pub fn resolve(settings: &Settings) -> Self {
        let public = match &settings.ssh_key_file {
            None => settings.homedir.join(DEFAULT_SSH_KEY),
            Some(file) if file.to_string_lossy().ends_with(PUB_SUFFIX) => file.clone(),
            Some(file) => {
                let mut name = file.clone().into_os_string();
                name.push(PUB_SUFFIX);
                PathBuf::from(name)
            }
        };

        let public_str = public.to_string_lossy();
        let secret = PathBuf::from(&public_str[..public_str.len() - PUB_SUFFIX.len()]);
        Self { public, secret }
    }
}

/// Собственные публичная и секретная связки ключей в домашней директории
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringPaths {
    pub pubring: PathBuf,
    pub secring: PathBuf,
}

impl KeyringPaths {
    pub fn resolve(settings: &Settings) -> Self {
        Self {
            pubring: settings.homedir.join(PUBRING),
            secring: settings.homedir.join(SECRING),
        }
    }
}

/// Имя хоста для синтезированных идентификаторов пользователя
#[cfg(unix)]
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match String::from_utf8_lossy(&buf[..end]).into_owned() {
        name if name.is_empty() => "localhost".to_string(),
        name => name,
    }
}

#[cfg(not(unix))]
pub fn local_hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_bounded_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, vec![7u8; 100]).unwrap();

        assert_eq!(read_bounded(&path, 100).unwrap().len(), 100);
        assert!(matches!(
            read_bounded(&path, 99),
            Err(PgpError::AllocationFailure(100))
        ));
        assert!(matches!(
            read_bounded(&dir.path().join("missing"), 10),
            Err(PgpError::Io(_))
        ));
    }

    #[test]
    fn test_read_capped_stream() {
        assert_eq!(read_capped(&[1u8, 2, 3][..], 3).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            read_capped(&[0u8; 10][..], 4),
            Err(PgpError::AllocationFailure(5))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("pubring.gpg");
        write_private(&path, b"keys").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"keys");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_ssh_key_paths() {
        let mut settings = Settings {
            homedir: PathBuf::from("/home/u/.ssh"),
            ..Settings::default()
        };
        let paths = SshKeyPaths::resolve(&settings);
        assert_eq!(paths.public, PathBuf::from("/home/u/.ssh/id_rsa.pub"));
        assert_eq!(paths.secret, PathBuf::from("/home/u/.ssh/id_rsa"));

        settings.ssh_key_file = Some(PathBuf::from("/keys/host_key"));
        let paths = SshKeyPaths::resolve(&settings);
        assert_eq!(paths.public, PathBuf::from("/keys/host_key.pub"));
        assert_eq!(paths.secret, PathBuf::from("/keys/host_key"));

        settings.ssh_key_file = Some(PathBuf::from("/keys/other.pub"));
        assert_eq!(SshKeyPaths::resolve(&settings).secret, PathBuf::from("/keys/other"));
    }

    #[test]
    fn test_keyring_paths() {
        let settings = Settings {
            homedir: PathBuf::from("/home/u/.gnupg"),
            ..Settings::default()
        };
        let paths = KeyringPaths::resolve(&settings);
        assert_eq!(paths.pubring, PathBuf::from("/home/u/.gnupg/pubring.gpg"));
        assert_eq!(paths.secring, PathBuf::from("/home/u/.gnupg/secring.gpg"));
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }
}
