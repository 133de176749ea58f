//! Blocking bridge over [`CallCredentials`].
//!
//! The provider is handed a completion closure. The calling thread then
//! drives a pollset until that closure has stored its outcome, so the token
//! comes back as a plain value whether the provider finished inline, through
//! the exec ctx, from a pollset job, or from some other thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::credentials::{
    AuthMetadataContext, CallCredentials, MetadataArray, MetadataClosure, MetadataStatus,
};
use crate::error::{CredentialsError, FetchError};
use crate::exec_ctx::ExecCtx;
use crate::pollset::{PollingEntity, Pollset, PollsetGuard};

#[derive(Debug, Clone, Default, bon::Builder)]
pub struct FetchOptions {
    #[builder(default)]
    context: AuthMetadataContext,

    /// Give up waiting after this long. Unbounded when unset.
    deadline: Option<Duration>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Created,
    Waiting,
    Completed,
}

#[derive(Debug, Default)]
struct OAuth2Request {
    phase: Phase,
    outcome: Option<Result<String, FetchError>>,
    // Closure dropped before the provider call returned
    abandoned: bool,
}

type RequestGuard<'a> = PollsetGuard<'a, OAuth2Request>;

fn complete(request: &mut RequestGuard<'_>, outcome: Result<String, FetchError>) {
    if request.phase == Phase::Completed {
        tracing::debug!("request already completed, ignoring late outcome");
        return;
    }
    request.outcome = Some(outcome);
    request.phase = Phase::Completed;
    request.kick();
}

fn on_oauth2_response(
    pollset: &Pollset<OAuth2Request>,
    result: Result<MetadataArray, CredentialsError>,
) {
    let outcome = match result {
        Err(err) => {
            tracing::error!("Fetching token failed: {err}");
            Err(FetchError::from(err))
        }
        Ok(metadata) => metadata
            .into_single()
            .map(|entry| entry.value)
            .map_err(|count| FetchError::MalformedMetadata { count }),
    };
    complete(&mut pollset.lock(), outcome);
}

fn on_closure_dropped(pollset: &Pollset<OAuth2Request>) {
    let mut request = pollset.lock();
    let phase = request.phase;
    match phase {
        Phase::Created => request.abandoned = true,
        Phase::Waiting => {
            tracing::error!("Fetching token failed: {}", CredentialsError::Abandoned);
            complete(&mut request, Err(CredentialsError::Abandoned.into()));
        }
        Phase::Completed => {}
    }
}

/// Polls until the request completes, the pollset fails, or `timeout`
/// elapses. A timeout too large to represent waits without bound.
fn drive(
    pollset: &Pollset<OAuth2Request>,
    exec_ctx: &mut ExecCtx,
    timeout: Option<Duration>,
) -> Option<Result<String, FetchError>> {
    let deadline = timeout.and_then(|timeout| {
        Instant::now()
            .checked_add(timeout)
            .map(|at| (at, timeout))
    });
    let mut request = pollset.lock();
    while request.phase != Phase::Completed {
        if let Some((at, timeout)) = deadline {
            if Instant::now() >= at {
                tracing::warn!(?timeout, "gave up waiting for token");
                complete(&mut request, Err(FetchError::DeadlineExceeded(timeout)));
                break;
            }
        }
        if let Err(err) = pollset.work(exec_ctx, &mut request, deadline.map(|(at, _)| at)) {
            tracing::error!(error = %err, "pollset_work");
            complete(&mut request, Err(err.into()));
        }
    }
    request.outcome.take()
}

/// Fetches a token, blocking the current thread until the provider is done.
///
/// Unlike the `Option` helpers this never panics: a provider that hands back
/// the wrong number of metadata entries yields
/// [`FetchError::MalformedMetadata`].
pub fn try_fetch_oauth2_token<C>(creds: &C, options: &FetchOptions) -> Result<String, FetchError>
where
    C: CallCredentials + ?Sized,
{
    let pollset = Pollset::new(OAuth2Request::default());
    let pollent = PollingEntity::from_pollset(&pollset);
    let mut exec_ctx = ExecCtx::new();

    let target = Arc::clone(&pollset);
    let on_done = MetadataClosure::new(move |result| match result {
        Some(result) => on_oauth2_response(&target, result),
        None => on_closure_dropped(&target),
    });

    match creds.get_request_metadata(&mut exec_ctx, &pollent, &options.context, on_done) {
        MetadataStatus::Ready(result) => on_oauth2_response(&pollset, result),
        MetadataStatus::Pending => {
            let mut request = pollset.lock();
            if request.phase == Phase::Created {
                if request.abandoned {
                    tracing::error!("Fetching token failed: {}", CredentialsError::Abandoned);
                    complete(&mut request, Err(CredentialsError::Abandoned.into()));
                } else {
                    request.phase = Phase::Waiting;
                }
            }
        }
    }
    exec_ctx.flush();

    let outcome = drive(&pollset, &mut exec_ctx, options.deadline);

    pollset.shutdown(&mut exec_ctx, Box::new(|_| {}));
    drop(exec_ctx);

    match outcome {
        Some(outcome) => outcome,
        None => Err(CredentialsError::Abandoned.into()),
    }
}

/// Like [`fetch_oauth2_token_with_credentials`] with explicit options.
///
/// # Panics
///
/// If the provider reports success with anything but exactly one metadata
/// entry.
pub fn fetch_oauth2_token_with_options<C>(creds: &C, options: &FetchOptions) -> Option<String>
where
    C: CallCredentials + ?Sized,
{
    match try_fetch_oauth2_token(creds, options) {
        Ok(token) => Some(token),
        Err(FetchError::MalformedMetadata { count }) => {
            panic!("expected exactly one metadata entry, got {count}")
        }
        // Already logged where it happened
        Err(_) => None,
    }
}

/// Blocks until `creds` produces request metadata and returns the value of
/// its single entry, or `None` if the fetch failed.
///
/// # Panics
///
/// If the provider reports success with anything but exactly one metadata
/// entry.
pub fn fetch_oauth2_token_with_credentials<C>(creds: &C) -> Option<String>
where
    C: CallCredentials + ?Sized,
{
    fetch_oauth2_token_with_options(creds, &FetchOptions::default())
}
