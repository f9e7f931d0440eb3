use std::future::pending;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Single-shot countdown signalling peer loss.
///
/// Each receive path resets its watchdog; if no packet arrives for the whole
/// expiration interval the engine observes [`wait`](Watchdog::wait) complete
/// and runs the reset cascade. The watchdog does not re-arm itself: after
/// firing, the handler calls [`halt`](Watchdog::halt) and the countdown stays
/// quiet until the next reset.
pub(crate) struct Watchdog {
    expiration: Duration,
    deadline: Instant,
    armed: bool,
}

impl Watchdog {
    pub(crate) fn new(expiration: Duration) -> Watchdog {
        Watchdog {
            expiration,
            deadline: Instant::now() + expiration,
            armed: true,
        }
    }

    #[inline(always)]
    pub(crate) const fn expiration_time(&self) -> Duration {
        self.expiration
    }

    /// Restarts the countdown.
    pub(crate) fn reset(&mut self) {
        self.deadline = Instant::now() + self.expiration;
        self.armed = true;
    }

    /// Changes the expiration interval and restarts the countdown.
    pub(crate) fn set_expiration_time(&mut self, expiration: Duration) {
        self.expiration = expiration;
        self.reset();
    }

    /// Disarms the countdown until the next [`reset`](Self::reset).
    pub(crate) fn halt(&mut self) {
        self.armed = false;
    }

    /// Completes when the countdown expires. Pends forever while halted.
    pub(crate) async fn wait(&self) {
        if self.armed {
            sleep_until(self.deadline).await;
        } else {
            pending::<()>().await;
        }
    }
}
