use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid length for {column}: expected {expected} bytes, got {got}")]
    InvalidLength {
        column: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Lock wait retries exhausted after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },

    #[error("Foreign keys are not enabled on this database connection")]
    MigrationPrecondition,

    #[error("Migration to version {version} failed: {message}")]
    MigrationFailed { version: i32, message: String },

    #[error("Invalid JID: {0}")]
    InvalidJid(String),

    #[error("Device must be registered (JID and signed identity set) before saving")]
    DeviceNotRegistered,

    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl Error {
    /// Wrap a database error with the operation that produced it.
    pub(crate) fn db(operation: &str, err: sqlx::Error) -> Self {
        Error::Database(format!("Failed to {}: {}", operation, err))
    }
}
