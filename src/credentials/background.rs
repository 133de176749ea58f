use std::sync::Arc;
use std::thread;

use crate::credentials::{
    AuthMetadataContext, CallCredentials, MetadataArray, MetadataClosure, MetadataStatus,
};
use crate::error::CredentialsError;
use crate::exec_ctx::ExecCtx;
use crate::pollset::PollingEntity;

/// Where the completion closure runs once the background fetch is done.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Delivery {
    /// On the fetching thread.
    #[default]
    Direct,

    /// On the thread driving the pollset, as a scheduled job.
    Pollset,
}

/// Runs a blocking fetch function on its own thread for every request.
pub struct BackgroundCredentials<F> {
    fetch: Arc<F>,
    delivery: Delivery,
}

impl<F> BackgroundCredentials<F>
where
    F: Fn(&AuthMetadataContext) -> Result<MetadataArray, CredentialsError> + Send + Sync + 'static,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch: Arc::new(fetch),
            delivery: Delivery::default(),
        }
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }
}

impl<F> CallCredentials for BackgroundCredentials<F>
where
    F: Fn(&AuthMetadataContext) -> Result<MetadataArray, CredentialsError> + Send + Sync + 'static,
{
    fn get_request_metadata(
        &self,
        _exec_ctx: &mut ExecCtx,
        pollent: &PollingEntity,
        context: &AuthMetadataContext,
        on_done: MetadataClosure,
    ) -> MetadataStatus {
        let fetch = Arc::clone(&self.fetch);
        let context = context.clone();
        // Only hold the pollset alive when we need to post back to it
        let pollent = (self.delivery == Delivery::Pollset).then(|| pollent.clone());

        thread::spawn(move || {
            tracing::debug!(
                service_url = context.service_url(),
                method_name = context.method_name(),
                "fetching request metadata"
            );
            let result = fetch(&context);
            match pollent {
                Some(pollent) => pollent.schedule(move |_| on_done.run(result)),
                None => on_done.run(result),
            }
        });

        MetadataStatus::Pending
    }
}
