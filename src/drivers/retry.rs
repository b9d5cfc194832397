use std::thread;
use std::time::Duration;

/// Retry with a fixed delay, giving up after a bounded number of attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedRetry {
    pub attempts: u32,
    pub delay: Duration,
}

/// Final error of an exhausted retry together with how many calls were made.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl FixedRetry {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
    /// Calls `op` until it succeeds. Sleeps only between failed attempts.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<(T, u32), RetryExhausted<E>> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok((value, attempt)),
                Err(last_error) if attempt >= self.attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error,
                    })
                }
                Err(_) => {
                    attempt += 1;
                    thread::sleep(self.delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn succeeds_on_later_attempt() {
        let mut failures_left = 3;
        let policy = FixedRetry::new(10, Duration::ZERO);
        let (value, attempts) = policy
            .run(|| {
                if failures_left > 0 {
                    failures_left -= 1;
                    Err("busy")
                } else {
                    Ok(42)
                }
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts, 4);
    }
    #[test]
    fn gives_up_after_bound() {
        let mut calls = 0;
        let policy = FixedRetry::new(5, Duration::ZERO);
        let err = policy
            .run(|| -> Result<(), u32> {
                calls += 1;
                Err(calls)
            })
            .unwrap_err();
        assert_eq!(calls, 5);
        assert_eq!(err.attempts, 5);
        assert_eq!(err.last_error, 5);
    }
    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = FixedRetry::new(0, Duration::ZERO);
        assert_eq!(policy.run(|| Ok::<_, ()>(1)).unwrap(), (1, 1));
    }
}
