use std::fmt::Display;
use std::time::Duration;

use backoff::{retry_notify, Error, ExponentialBackoff};

/// Retry `fn_to_try` with exponential backoff, giving up after `max_elapsed` (or the crate default)
pub fn backoff_retry<F, T, E>(fn_to_try: F, max_elapsed: Option<Duration>) -> Result<T, Error<E>>
where
    F: FnMut() -> Result<T, Error<E>>,
    E: Display,
{
    let notify = |err, dur: Duration| {
        log::warn!("Temporary error after {:.1}s: {}", dur.as_secs_f32(), err);
    };

    let mut backoff = ExponentialBackoff::default();
    if max_elapsed.is_some() {
        backoff.max_elapsed_time = max_elapsed;
    }
    retry_notify(backoff, fn_to_try, notify)
}
