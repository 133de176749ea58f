//! Credentials providers and the metadata they produce.

mod background;
mod static_token;

use std::fmt;

pub use background::{BackgroundCredentials, Delivery};
pub use static_token::StaticTokenCredentials;

use crate::error::CredentialsError;
use crate::exec_ctx::ExecCtx;
use crate::pollset::PollingEntity;

pub const AUTHORIZATION: &str = "authorization";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn bearer(token: &str) -> Self {
        Self::new(AUTHORIZATION, format!("Bearer {token}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataArray(Vec<MetadataEntry>);

impl MetadataArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: MetadataEntry) {
        self.0.push(entry);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetadataEntry> {
        self.0.iter()
    }

    /// The only entry, or the entry count when there isn't exactly one.
    pub fn into_single(self) -> Result<MetadataEntry, usize> {
        let mut entries = self.0;
        match entries.len() {
            1 => Ok(entries.remove(0)),
            count => Err(count),
        }
    }
}

impl From<Vec<MetadataEntry>> for MetadataArray {
    fn from(entries: Vec<MetadataEntry>) -> Self {
        Self(entries)
    }
}

impl FromIterator<MetadataEntry> for MetadataArray {
    fn from_iter<I: IntoIterator<Item = MetadataEntry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What the call is authenticating, as seen by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct AuthMetadataContext {
    #[builder(into, default)]
    service_url: String,

    #[builder(into, default)]
    method_name: String,
}

impl AuthMetadataContext {
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }
}

type Callback = Box<dyn FnOnce(Option<Result<MetadataArray, CredentialsError>>) + Send>;

/// Single-use completion callback handed to a provider.
///
/// Running it consumes it. Dropping it without running it tells the waiter
/// that no result is coming (the callback sees `None`).
pub struct MetadataClosure {
    callback: Option<Callback>,
}

impl MetadataClosure {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Option<Result<MetadataArray, CredentialsError>>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn run(mut self, result: Result<MetadataArray, CredentialsError>) {
        if let Some(callback) = self.callback.take() {
            callback(Some(result));
        }
    }
}

impl Drop for MetadataClosure {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(None);
        }
    }
}

impl fmt::Debug for MetadataClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataClosure")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub enum MetadataStatus {
    /// Finished during the call. The closure will not be run.
    Ready(Result<MetadataArray, CredentialsError>),
    /// The closure runs later, from any thread.
    Pending,
}

pub trait CallCredentials: Send + Sync {
    /// Starts fetching request metadata.
    ///
    /// Either returns [`MetadataStatus::Ready`] and drops `on_done`, or
    /// returns [`MetadataStatus::Pending`] and runs `on_done` exactly once
    /// later. Work that has to happen on the waiting thread can be pushed to
    /// `exec_ctx` (run right after this call returns) or to `pollent` (run
    /// inside the poll loop).
    fn get_request_metadata(
        &self,
        exec_ctx: &mut ExecCtx,
        pollent: &PollingEntity,
        context: &AuthMetadataContext,
        on_done: MetadataClosure,
    ) -> MetadataStatus;
}
