use std::time::{Duration, Instant};

/// Wall-clock stopwatch that can exclude stretches of work from the measurement.
#[derive(Debug)]
pub struct Stopwatch {
    started: Option<Instant>,
    elapsed: Duration,
}

impl Stopwatch {
    pub fn start() -> Self { Self { started: Some(Instant::now()), elapsed: Duration::ZERO } }

    pub fn pause(&mut self) {
        if let Some(t) = self.started.take() {
            self.elapsed += t.elapsed();
        }
    }

    pub fn resume(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn is_paused(&self) -> bool { self.started.is_none() }

    pub fn elapsed(&self) -> Duration {
        self.elapsed + self.started.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Runs `f` with the clock paused.
    pub fn excluding<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let was_running = !self.is_paused();
        self.pause();
        let out = f();
        if was_running {
            self.resume();
        }
        out
    }
}

pub fn format_seconds(d: Duration) -> String {
    format!("{:.3}s", d.as_secs_f64())
}
