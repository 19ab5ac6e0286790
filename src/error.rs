//! Crate-wide error taxonomy.
//!
//! Variants are grouped the way the design splits them: input validation,
//! state lookups, on-disk storage, and database lifecycle. `Display` wording
//! is kept short and lower-case so command adapters can prefix it with
//! `ERR ` and hand it straight to a client.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --- Input ---
    #[error("key is empty")]
    EmptyKey,
    #[error("key exceeds max key size")]
    KeyTooLarge,
    #[error("value exceeds max value size")]
    ValueTooLarge,
    #[error("invalid ttl")]
    InvalidTtl,
    #[error("extra field contains the reserved separator")]
    ExtraContainsSeparator,
    #[error("wrong number of arguments for '{0}' command")]
    SyntaxIncorrect(String),

    // --- State ---
    #[error("key not exist")]
    KeyNotExist,
    #[error("key expired")]
    KeyExpired,
    #[error("nil indexer")]
    NilIndexer,

    // --- Storage ---
    #[error("invalid entry: empty key on write")]
    InvalidEntry,
    #[error("invalid crc")]
    InvalidCrc,
    #[error("empty entry")]
    EmptyEntry,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // --- Lifecycle ---
    #[error("{0} does not exist, cannot reopen")]
    CfgNotExist(PathBuf),
    #[error("reclaim threshold not reached by any type")]
    ReclaimUnreached,
    #[error("database is already reclaiming")]
    DbIsReclaiming,
    #[error("lock poisoned, in-memory state may be inconsistent with the log")]
    Poisoned,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl<G> From<std::sync::PoisonError<G>> for Error {
    fn from(_: std::sync::PoisonError<G>) -> Self {
        Error::Poisoned
    }
}
