//! Job model and request validation.
//!
//! A request enters as a [`ConversionRequest`] (whatever the HTTP layer
//! collected), is checked by [`JobValidator`] and leaves as an immutable
//! [`JobDescriptor`] carrying normalized [`JobParams`].

mod formats;
mod types;
mod validate;

pub use formats::{content_type_for_extension, AudioTarget, DownloadMode, ImageTarget};
pub use types::{
    ConversionRequest, InputRef, JobDescriptor, JobKind, JobParams, RequestId, UploadedFile,
};
pub use validate::JobValidator;
