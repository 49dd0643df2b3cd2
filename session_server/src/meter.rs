//! Throughput counters, drained into one log line per window.
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};

/// Length of one logging window.
pub const LOG_PERIOD: Duration = Duration::from_secs(2);

pub static METER: Meter = Meter::new();

/// Counts of collected samples and served predictions since the last `take`.
#[derive(Debug, Default)]
pub struct Meter {
    samples: AtomicU64,
    predictions: AtomicU64,
}

/// What a meter counted over one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub samples: u64,
    pub predictions: u64,
    pub elapsed: Duration,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            samples: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
        }
    }

    pub fn add_samples(&self, count: u64) {
        self.samples.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_predictions(&self, count: u64) {
        self.predictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Drain both counters into a window of length `elapsed`.
    pub fn take(&self, elapsed: Duration) -> Throughput {
        Throughput {
            samples: self.samples.swap(0, Ordering::Relaxed),
            predictions: self.predictions.swap(0, Ordering::Relaxed),
            elapsed,
        }
    }
}

impl Throughput {
    pub fn is_idle(&self) -> bool {
        self.samples == 0 && self.predictions == 0
    }

    fn rate(&self, count: u64) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            count as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples ({:.2}/s), {} predictions ({:.2}/s) in {:.1}s",
            self.samples,
            self.rate(self.samples),
            self.predictions,
            self.rate(self.predictions),
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Log the global meter once per `period`, skipping windows without traffic.
pub fn spawn_meter_logger(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut window_start = Instant::now();

        loop {
            ticker.tick().await;
            let now = Instant::now();
            let throughput = METER.take(now - window_start);
            window_start = now;

            if !throughput.is_idle() {
                log::info!("Throughput: {throughput}");
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn take_drains_a_window() {
        let meter = Meter::new();
        meter.add_samples(1);
        meter.add_samples(3);
        meter.add_predictions(6);

        let window = meter.take(Duration::from_secs(2));
        assert_eq!(window.samples, 4);
        assert_eq!(window.predictions, 6);
        assert!(!window.is_idle());
        assert_eq!(
            window.to_string(),
            "4 samples (2.00/s), 6 predictions (3.00/s) in 2.0s"
        );

        assert!(meter.take(Duration::from_secs(2)).is_idle());
    }

    #[test]
    fn zero_length_window_has_no_rate() {
        let meter = Meter::new();
        meter.add_predictions(5);
        let window = meter.take(Duration::ZERO);
        assert_eq!(window.rate(window.predictions), 0.0);
    }
}
