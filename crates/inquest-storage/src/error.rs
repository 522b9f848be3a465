use inquest_core::IdentityError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no value stored under key `{key}`")]
    NotFound { key: String },
    #[error("stored bytes do not decode as {type_name}: {message}")]
    Deserialization {
        type_name: &'static str,
        message: String,
    },
    #[error("failed to encode {type_name}: {message}")]
    Serialization {
        type_name: &'static str,
        message: String,
    },
    #[error("key `{key}` holds a locked aggregate and cannot be written directly")]
    ReservedKey { key: String },
    #[error("partition {} is already open", path.display())]
    AlreadyOpen { path: PathBuf },
    #[error("embedded database error: {0}")]
    Backend(#[from] sled::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl StoreError {
    pub fn not_found(key: &[u8]) -> Self {
        Self::NotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    pub fn deserialization<T: ?Sized>(message: impl ToString) -> Self {
        Self::Deserialization {
            type_name: std::any::type_name::<T>(),
            message: message.to_string(),
        }
    }

    pub fn serialization<T: ?Sized>(message: impl ToString) -> Self {
        Self::Serialization {
            type_name: std::any::type_name::<T>(),
            message: message.to_string(),
        }
    }

    /// Absence is often expected ("not cached yet"); callers branch on it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
