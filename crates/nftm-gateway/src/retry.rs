//! Resending provider calls after transport failures.
//!
//! A call is resent only when the provider cannot have acted on it. For a
//! read that is any transport failure. For a call that creates something
//! (a wallet, a credential, a mint) only a failed connect qualifies: once
//! the body may have reached the provider, a timeout says nothing about
//! whether it was applied, and a resend could apply it twice. Replies of
//! any status go back to the caller untouched.

use std::time::Duration;

const RESENDS: u32 = 2;

/// First backoff step; doubles on every resend.
const BACKOFF: Duration = Duration::from_millis(150);

/// How a call may be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Reads and logins: safe to deliver more than once.
    Replayable,
    /// Calls with side effects on the provider.
    AtMostOnce,
}

impl Delivery {
    fn may_resend(self, err: &reqwest::Error) -> bool {
        match self {
            Self::Replayable => err.is_connect() || err.is_timeout(),
            Self::AtMostOnce => err.is_connect(),
        }
    }
}

/// Send a request built by `f`, resending while `delivery` allows it.
pub(crate) async fn send<F, Fut>(
    endpoint: &str,
    delivery: Delivery,
    f: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut resends = 0;
    loop {
        let err = match f().await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };
        if resends == RESENDS || !delivery.may_resend(&err) {
            return Err(err);
        }
        let delay = BACKOFF * 2u32.pow(resends);
        resends += 1;
        tracing::warn!(endpoint, resend = resends, ?delivery, "provider unreachable, resending in {delay:?}: {err}");
        tokio::time::sleep(delay).await;
    }
}
