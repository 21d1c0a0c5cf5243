//! Error types for the registry, its storage and the commands that mutate it.

/// Failures writing the persisted blob.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode registry: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The only structural check applied to loaded or imported data.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("expected an object keyed by city name, found {found}")]
    NotAnObject { found: &'static str },
}

/// Everything a command can be rejected with. All of these leave the store as it was.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("Name is required.")]
    EmptyName,

    #[error("City is required.")]
    MissingCity,

    #[error("City not found: {0}")]
    UnknownCity(String),

    #[error("Quantity must be a positive whole number, got {0}")]
    InvalidQuantity(String),

    #[error("Adding {quantity} tree(s) would overflow the total for {city}")]
    TotalOverflow { city: String, quantity: u64 },

    #[error("{0} requires confirmation")]
    ConfirmationRequired(&'static str),

    #[error("Invalid import file: {0}")]
    ImportShape(#[from] SchemaError),

    #[error("Could not read import file: {0}")]
    ImportParse(#[source] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl OpError {
    /// Rejections caused by user input rather than by the storage backend.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, OpError::Storage(_))
    }
}

pub type OpResult<T> = Result<T, OpError>;
