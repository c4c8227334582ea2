mod error;
mod state_machine;
mod types;
mod uploader;

pub use error::{UploaderError, UploaderResult};
pub use state_machine::BatchStateMachine;
pub use types::{
    BatchEvent, BatchState, ChannelObserver, NoopObserver, UploadEvent, UploadObserver,
    UploaderConfig,
};
pub use uploader::ChunkedUploader;
