mod types;

pub use types::{
    format_bytes, percent, AggregateProgress, LocalFile, TaskDescriptor, TaskStatus, UploadStatus,
    UploadTask,
};
