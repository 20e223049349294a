// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded, cancellable status polling.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Poll `check` every `interval` until it yields a value.
///
/// The first check runs immediately. Fails with [`Error::Timeout`] once
/// `timeout` has elapsed and with [`Error::Cancelled`] as soon as `cancel`
/// fires; an error from `check` ends the loop.
pub async fn poll_until<T, F, Fut>(
    cancel: &CancellationToken,
    interval: Duration,
    timeout: Duration,
    what: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(what.to_string()));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
