//! Synchronously wait for a token from an asynchronous, callback-driven
//! credentials provider. Meant for test harnesses.

pub mod credentials;
pub mod error;
pub mod exec_ctx;
pub mod pollset;
mod token_fetch;

pub use credentials::{
    AuthMetadataContext, BackgroundCredentials, CallCredentials, Delivery, MetadataArray,
    MetadataClosure, MetadataEntry, MetadataStatus, StaticTokenCredentials,
};
pub use error::{CredentialsError, FetchError, PollError};
pub use exec_ctx::ExecCtx;
pub use pollset::{PollingEntity, Pollset, PollsetStats, WeakPollingEntity};
pub use token_fetch::{
    FetchOptions, fetch_oauth2_token_with_credentials, fetch_oauth2_token_with_options,
    try_fetch_oauth2_token,
};
