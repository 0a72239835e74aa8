use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pgp_core::cli;
use pgp_core::config::Settings;
use pgp_core::crypto::HashAlgorithm;
use pgp_core::keystore::KeyStoreFormat;
use pgp_core::Result;

#[derive(Parser)]
#[command(name = "pgp-core")]
#[command(author = "Oleg")]
#[command(version = "0.1.0")]
#[command(about = "Ядро OpenPGP: хеши, ключи и импорт ключей OpenSSH", long_about = None)]
struct Cli {
    /// Путь к файлу настроек (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Подробный вывод
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Вычислить хеш файлов (или stdin, если файлы не указаны)
    Digest {
        /// Алгоритм хеширования (по умолчанию из настроек)
        #[arg(long)]
        hash: Option<HashAlgorithm>,
        files: Vec<PathBuf>,
    },

    /// Показать ключи из связки или ключи OpenSSH
    ListKeys {
        /// Формат: GPG или SSH (по умолчанию из настроек)
        #[arg(long)]
        format: Option<KeyStoreFormat>,
        /// Показать секретные ключи
        #[arg(long)]
        secret: bool,
    },

    /// Импортировать ключи OpenSSH в связку ключей
    ImportSsh {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Сгенерировать новый ключ RSA
    GenerateKey {
        /// Длина модуля в битах
        #[arg(long, default_value_t = 2048)]
        bits: usize,
        /// Идентификатор пользователя
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Проверить парольную фразу секретного ключа
    CheckPass {
        /// Идентификатор ключа или часть имени пользователя
        name: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "pgp_core=debug" } else { "pgp_core=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Ошибка:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Digest { hash, files } => cli::digest::run(&settings, hash, &files),
        Commands::ListKeys { format, secret } => cli::keys::list(&settings, format, secret),
        Commands::ImportSsh { files } => cli::keys::import_ssh(&settings, &files),
        Commands::GenerateKey { bits, user_id } => cli::keygen::run(&settings, bits, user_id),
        Commands::CheckPass { name } => cli::keys::check_passphrase(&settings, &name),
    }
}
