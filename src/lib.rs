//! App Store Connect API runtime: token minting, a retrying request pipeline,
//! pagination, typed query options and the three-phase asset upload.

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod paginate;
pub mod query;
pub mod resources;
pub mod retry;
pub mod upload;
pub mod util;

pub use client::{AppStoreConnectClient, OperationKind, UploadPhaseRequest};
pub use config::{ClientSettings, Config, Credentials, RetrySettings};
pub use context::CallContext;
pub use envelope::{Document, ListResponse, Resource, ResourceRef, SingleResponse};
pub use error::{AscError, ErrorKind, Result, UploadPhase};
pub use paginate::{paginate_all, paginate_all_with_limit};
pub use query::{Granularity, ListOptions, MetricsOptions, QueryBag};
pub use upload::{UploadCoordinator, UploadOutcome, UploadState};
