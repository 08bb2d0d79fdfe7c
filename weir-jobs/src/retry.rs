//  RETRY.rs
//    by Lut99
//
//  Created:
//    18 Feb 2025, 13:47:25
//  Last edited:
//    22 Jul 2025, 10:09:13
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the retry policy used around provider calls: bounded
//!   attempts with exponential, jittered backoff, retrying only errors
//!   the taxonomy classifies as transient.
//

use std::future::Future;
use std::time::Duration;

use log::debug;
use rand::Rng as _;

use crate::errors::GatewayError;


/***** LIBRARY *****/
/// A bounded exponential-backoff retry policy, filtered on transient errors.
///
/// Permanent errors (anything [`GatewayError::is_transient()`] rejects) are returned immediately;
/// transient ones are retried until the attempt budget runs out.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// The maximum number of attempts (including the first).
    pub attempts: u32,
    /// The backoff before the second attempt. Doubles every further attempt.
    pub base: Duration,
    /// The upper bound on any single backoff.
    pub cap: Duration,
}
impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self { Self { attempts: 3, base: Duration::from_millis(200), cap: Duration::from_secs(1) } }
}
impl RetryPolicy {
    /// Constructor for a RetryPolicy.
    ///
    /// # Arguments
    /// - `attempts`: The maximum number of attempts, including the first.
    /// - `base`: The backoff before the second attempt.
    /// - `cap`: The upper bound on any single backoff.
    #[inline]
    pub fn new(attempts: u32, base: Duration, cap: Duration) -> Self { Self { attempts, base, cap } }

    /// Runs the given asynchronous operation under this policy.
    ///
    /// # Arguments
    /// - `op`: A closure producing the operation future. Called once per attempt.
    ///
    /// # Returns
    /// The first successful result, or the last error once the budget is spent or a permanent
    /// error occurs.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(res) => return Ok(res),
                Err(err) => {
                    if !err.is_transient() || attempt >= self.attempts.max(1) {
                        return Err(err);
                    }

                    let backoff: Duration = self.backoff(attempt);
                    debug!("Attempt {}/{} failed ({}); retrying in {:?}", attempt, self.attempts, err, backoff);
                    tokio::time::sleep(backoff).await;
                },
            }
        }
    }

    /// Computes the jittered backoff after the given (1-based) attempt.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp: Duration = self.base.saturating_mul(1u32 << (attempt - 1).min(16));
        let capped: Duration = exp.min(self.cap);
        // Spread concurrent retriers out a little
        capped.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.25))
    }
}





/***** TESTS *****/
