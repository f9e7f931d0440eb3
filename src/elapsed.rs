use tokio::time::Instant;

/// Enable-scoped stopwatch behind the `mm:ss.d` readout of the operator
/// console. Restarted from zero on every enable and on mode changes while
/// enabled, frozen while disabled.
pub(crate) struct ElapsedTimer {
    started: Instant,
    running: bool,
}

impl ElapsedTimer {
    pub(crate) fn new() -> ElapsedTimer {
        ElapsedTimer {
            started: Instant::now(),
            running: false,
        }
    }

    /// Restarts the stopwatch from zero.
    pub(crate) fn restart(&mut self) {
        self.started = Instant::now();
        self.running = true;
    }

    /// Freezes the stopwatch. The next [`restart`](Self::restart) begins a
    /// fresh measurement.
    pub(crate) fn stop(&mut self) {
        self.running = false;
    }

    #[inline(always)]
    pub(crate) const fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn elapsed_millis(&self) -> u64 {
        if self.running {
            self.started.elapsed().as_millis() as u64
        } else {
            0
        }
    }
}

/// Formats a millisecond count as `mm:ss.d`, minutes and seconds zero-padded
/// to two digits and a single tenths digit.
pub(crate) fn format_elapsed(millis: u64) -> String {
    let secs = millis / 1000;
    let mins = (secs / 60) % 60;
    format!("{:02}:{:02}.{}", mins, secs % 60, (millis % 1000) / 100)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn readout_format() {
        assert_eq!(format_elapsed(0), "00:00.0");
        assert_eq!(format_elapsed(100), "00:00.1");
        assert_eq!(format_elapsed(1_500), "00:01.5");
        assert_eq!(format_elapsed(59_900), "00:59.9");
        assert_eq!(format_elapsed(60_000), "01:00.0");
        assert_eq!(format_elapsed(754_321), "12:34.3");
    }

    #[tokio::test(start_paused = true)]
    async fn stopwatch_is_enable_scoped() {
        let mut timer = ElapsedTimer::new();
        assert_eq!(timer.elapsed_millis(), 0);

        timer.restart();
        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(timer.elapsed_millis(), 2_500);

        timer.stop();
        assert_eq!(timer.elapsed_millis(), 0);

        timer.restart();
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(timer.elapsed_millis(), 300);
    }
}
