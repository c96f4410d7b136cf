// src/error.rs

use thiserror::Error;

/// Core error types for the catalog store
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// The store file is unavailable, corrupt, or lacks the expected schema
    #[error("Cannot open catalog store {path}: {reason}")]
    StoreOpen { path: String, reason: String },

    /// A required statement could not be prepared against the schema
    #[error("Cannot prepare statement: {0}")]
    PrepareStatement(String),

    /// A mandatory column was NULL or malformed
    #[error("Malformed row in catalog {catalog}: {reason}")]
    RowDecode { catalog: String, reason: String },

    /// Malformed dependency or lock expression
    #[error("Invalid capability '{expr}': {reason}")]
    CapabilityParse { expr: String, reason: String },

    /// A pending transaction references an id missing from the working set
    #[error("Resolvable id {0} does not exist.")]
    RowLookup(i64),

    /// A request targets a user-locked item
    #[error("{item} is locked and cannot be {verb}")]
    LockedItemConflict { item: String, verb: String },

    /// Bad catalog URL or alias argument
    #[error("Invalid catalog URI '{uri}': {reason}")]
    InvalidCatalogUri { uri: String, reason: String },

    /// Checksum mismatch on a local payload
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Parse error in a catalog dump or checksum string
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;
