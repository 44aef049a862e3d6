pub mod admission;
pub mod backend;
pub mod config;
pub mod failure;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod testing;

pub use admission::{
    create_authenticator, Admission, AdmissionFilter, AuthError, AuthRequest, Authenticator,
    ConcurrencyLimiter, DenyReason, GatewayAdmission, Identity, NoneAuthenticator,
};
pub use backend::{Backend, BackendError, BackendInvoker, BackendOutcome, ToolRegistry};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthMethod, Config, ConfigError,
    SanitizedConfig,
};
pub use failure::{BackendFailureKind, Failure, FailureKind};
pub use job::{ConversionRequest, JobKind, RequestId};
pub use orchestrator::{ConversionResult, JobReport, JobState, Orchestrator};
pub use store::{StoreError, TempStore};
