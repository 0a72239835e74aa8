use thiserror::Error;

pub type Result<T> = std::result::Result<T, PgpError>;

#[derive(Debug, Error)]
pub enum PgpError {
    #[error("Алгоритм не поддерживается: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Входное значение не меньше модуля")]
    InputTooLarge,

    #[error("Буфер слишком мал: нужно {needed} байт, доступно {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Ошибка расшифровки: данные не согласуются с параметрами ключа")]
    DecryptionFailure,

    #[error("Ошибка генерации ключа: {0}")]
    KeyGenerationFailure(String),

    #[error("Неизвестный тип ключа '{0}'")]
    UnrecognizedKeyType(String),

    #[error("Данные обрезаны: поле требует {needed} байт, осталось {remaining}")]
    TruncatedData { needed: usize, remaining: usize },

    #[error("Неверный формат: {0}")]
    FormatError(String),

    #[error("Отказ в выделении {0} байт")]
    AllocationFailure(usize),

    #[error("Некорректный ключ: {0}")]
    InvalidKey(String),

    #[error("Секретный ключ заблокирован")]
    SecretKeyLocked,

    #[error("Неверная парольная фраза или повреждённый секретный ключ")]
    BadPassphrase,

    #[error("Некорректная конфигурация: {0}")]
    InvalidConfig(String),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка JSON: {0}")]
    Json(#[from] serde_json::Error),
}
