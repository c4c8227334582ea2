mod backend;
mod error;
mod presign;

pub use backend::ObjectStorage;
pub use error::{StorageError, StorageResult};
pub use presign::PresignedStorage;
