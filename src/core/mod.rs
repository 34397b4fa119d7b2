pub mod config;
pub mod document;
pub mod error;

pub use config::OdmConfig;
pub use document::{Document, OBJECT_ID, ObjectId, Pointer};
pub use error::{OdmError, Result};
