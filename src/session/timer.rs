use time::OffsetDateTime;

/// Seconds left in an attempt: `duration - floor(elapsed)`, clamped to
/// `[0, duration]`. Never stored; always recomputed from the server's start time.
pub(crate) fn remaining_seconds(
    duration_minutes: u32,
    start_time: OffsetDateTime,
    now: OffsetDateTime,
) -> u64 {
    let total = i64::from(duration_minutes) * 60;
    let elapsed = (now - start_time).whole_seconds().max(0);
    (total - elapsed).max(0) as u64
}

/// Whole seconds since the attempt started, capped at the test duration.
pub(crate) fn elapsed_seconds(
    duration_minutes: u32,
    start_time: OffsetDateTime,
    now: OffsetDateTime,
) -> u64 {
    let total = u64::from(duration_minutes) * 60;
    total - remaining_seconds(duration_minutes, start_time, now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerTick {
    Running(u64),
    /// Reported once, on the first tick that observes zero.
    Expired,
    Stopped,
}

/// Wall-clock countdown. There is no pause: time keeps running while the
/// session is hidden or unfocused.
#[derive(Debug, Clone)]
pub(crate) struct Countdown {
    duration_minutes: u32,
    start_time: OffsetDateTime,
    fired: bool,
    stopped: bool,
}

impl Countdown {
    pub(crate) fn new(duration_minutes: u32, start_time: OffsetDateTime) -> Self {
        Self { duration_minutes, start_time, fired: false, stopped: false }
    }

    pub(crate) fn remaining(&self, now: OffsetDateTime) -> u64 {
        remaining_seconds(self.duration_minutes, self.start_time, now)
    }

    pub(crate) fn elapsed(&self, now: OffsetDateTime) -> u64 {
        elapsed_seconds(self.duration_minutes, self.start_time, now)
    }

    pub(crate) fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.remaining(now) == 0
    }

    pub(crate) fn tick(&mut self, now: OffsetDateTime) -> TimerTick {
        if self.stopped {
            return TimerTick::Stopped;
        }

        match self.remaining(now) {
            0 if self.fired => TimerTick::Stopped,
            0 => {
                self.fired = true;
                self.stopped = true;
                TimerTick::Expired
            }
            remaining => TimerTick::Running(remaining),
        }
    }

    pub(crate) fn stop(&mut self) {
        self.stopped = true;
    }
}
