//! Temp artifact store.
//!
//! Owns every temporary file a job creates. Artifacts are namespaced by the
//! job's [`RequestId`](crate::job::RequestId); nothing outside a job's scope
//! can reach them, and cleanup discards whatever was not published.

mod artifact;
mod error;
mod temp_store;

pub use artifact::{ArtifactId, ArtifactState, CleanupReport, PublicRef, TempArtifact};
pub use error::StoreError;
pub(crate) use error::is_out_of_space;
pub use temp_store::{JobScope, TempStore};
