use crate::credentials::{
    AuthMetadataContext, CallCredentials, MetadataArray, MetadataClosure, MetadataEntry,
    MetadataStatus,
};
use crate::exec_ctx::ExecCtx;
use crate::pollset::PollingEntity;

/// Attaches a fixed bearer token. Always completes synchronously.
#[derive(Debug, Clone)]
pub struct StaticTokenCredentials {
    token: String,
}

impl StaticTokenCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CallCredentials for StaticTokenCredentials {
    fn get_request_metadata(
        &self,
        _exec_ctx: &mut ExecCtx,
        _pollent: &PollingEntity,
        _context: &AuthMetadataContext,
        _on_done: MetadataClosure,
    ) -> MetadataStatus {
        MetadataStatus::Ready(Ok(MetadataArray::from(vec![MetadataEntry::bearer(
            &self.token,
        )])))
    }
}
