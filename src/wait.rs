//! Ожидание условия с периодической перепроверкой.
//!
//! Для состояний, у которых нет собственного сигнала (внешний флаг,
//! счётчик в метриках). Там, где сигнал есть, лучше ждать на нём.

use std::{
    thread,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

const DEFAULT_INTERVAL: Duration = Duration::from_millis(1);

pub struct PredicateWait<P> {
    predicate: P,
    interval: Duration,
}

impl<P> PredicateWait<P>
where
    P: FnMut() -> bool,
{
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn wait(&mut self) {
        self.poll_until(None, None);
    }

    /// Returns false if the timeout elapsed first.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        self.poll_until(Some(timeout), None)
    }

    /// Returns false if the token was cancelled first.
    pub fn wait_cancellable(&mut self, token: &CancellationToken) -> bool {
        self.poll_until(None, Some(token))
    }

    pub fn wait_timeout_cancellable(
        &mut self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> bool {
        self.poll_until(Some(timeout), Some(token))
    }

    fn poll_until(&mut self, timeout: Option<Duration>, token: Option<&CancellationToken>) -> bool {
        let started = Instant::now();

        loop {
            if (self.predicate)() {
                return true;
            }
            if token.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }

            let pause = match timeout {
                Some(timeout) => {
                    let left = timeout.saturating_sub(started.elapsed());
                    if left.is_zero() {
                        return false;
                    }
                    left.min(self.interval)
                }
                None => self.interval,
            };
            thread::sleep(pause);
        }
    }
}
