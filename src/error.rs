use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("HMAC does not match ciphertext")]
    IntegrityFailure,

    #[error("Crypto primitive failed: {0}")]
    CryptoFailure(String),

    #[error("Plaintext is not valid UTF-8")]
    InvalidUtf8,

    #[error("Persisted state does not match schema: {0}")]
    SchemaMismatch(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
