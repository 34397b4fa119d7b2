use thiserror::Error;

#[derive(Error, Debug)]
pub enum OdmError {
    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("No discriminator mapping for value {value:?} and no usable default")]
    UnresolvedDiscriminator { value: Option<String> },

    #[error("Broken reference: {class_name} '{id}' does not exist")]
    BrokenReference { class_name: String, id: String },

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Instance #{0} is not managed by this object graph")]
    UnknownInstance(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OdmError {
    /// Errors that only invalidate a single element of a collection.
    ///
    /// Everything else (mapping and storage failures) aborts the whole
    /// resolution.
    pub fn is_element_scoped(&self) -> bool {
        matches!(
            self,
            Self::BrokenReference { .. }
                | Self::UnresolvedDiscriminator { .. }
                | Self::DataIntegrity(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OdmError>;

impl<T> From<std::sync::PoisonError<T>> for OdmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for OdmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<regex::Error> for OdmError {
    fn from(err: regex::Error) -> Self {
        Self::Mapping(format!("Invalid $regex pattern: {}", err))
    }
}
