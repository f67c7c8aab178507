//! Sliding-window bitrate and packet counters.

use std::time::Instant;

/// Default window, in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 1000;
/// Scale turning bytes-per-window into bits per second for a 1000 ms window.
const BPS_SCALE: f64 = 8000.0;

/// Computes the bitrate over a sliding window of per-millisecond byte
/// buckets. Time only moves forward: updates into the past are ignored.
pub struct RateCalculator {
    buffer: Vec<usize>,
    window_ms: u64,
    scale: f64,
    epoch: Instant,
    /// Milliseconds since epoch (offset by one window) of the oldest bucket.
    oldest_ms: u64,
    oldest_index: usize,
    total: usize,
}

impl RateCalculator {
    pub fn new(now: Instant) -> Self {
        Self::with_window(now, DEFAULT_WINDOW_MS)
    }

    pub fn with_window(now: Instant, window_ms: u64) -> Self {
        Self {
            buffer: vec![0; window_ms as usize],
            window_ms,
            scale: BPS_SCALE * DEFAULT_WINDOW_MS as f64 / window_ms as f64,
            epoch: now,
            oldest_ms: 0,
            oldest_index: 0,
            total: 0,
        }
    }

    /// Milliseconds on the internal axis, where construction time maps to
    /// one full window so the initial `oldest_ms` of zero sits exactly one
    /// window in the past.
    fn ms(&self, now: Instant) -> u64 {
        self.window_ms + now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    pub fn update(&mut self, size: usize, now: Instant) {
        let now_ms = self.ms(now);
        if now_ms < self.oldest_ms {
            return;
        }

        self.remove_old_data(now_ms);

        // The newest bucket sits one window past the oldest.
        let offset = self.window_ms as usize - 1;
        let mut index = self.oldest_index + offset;
        if index >= self.window_ms as usize {
            index -= self.window_ms as usize;
        }

        self.buffer[index] += size;
        self.total += size;
    }

    /// Rate over the window ending at `now`, in bits per second.
    pub fn rate(&mut self, now: Instant) -> u32 {
        let now_ms = self.ms(now);
        self.remove_old_data(now_ms);

        let nominal_window = (now_ms - self.oldest_ms) as f64;
        (self.total as f64 * self.scale / nominal_window + 0.5) as u32
    }

    fn remove_old_data(&mut self, now_ms: u64) {
        let new_oldest = now_ms.saturating_sub(self.window_ms);
        if new_oldest <= self.oldest_ms {
            return;
        }

        // A whole window has elapsed since the last entry.
        if new_oldest > self.oldest_ms + self.window_ms {
            self.reset(new_oldest);
            return;
        }

        while self.oldest_ms < new_oldest {
            self.total -= self.buffer[self.oldest_index];
            self.buffer[self.oldest_index] = 0;
            self.oldest_index += 1;
            if self.oldest_index >= self.window_ms as usize {
                self.oldest_index = 0;
            }
            self.oldest_ms += 1;
        }
    }

    fn reset(&mut self, oldest_ms: u64) {
        self.buffer.iter_mut().for_each(|b| *b = 0);
        self.total = 0;
        self.oldest_index = 0;
        self.oldest_ms = oldest_ms;
    }
}

/// Per-stream transfer totals plus the windowed rate.
pub struct DataCounter {
    rate: RateCalculator,
    packets: u64,
    bytes: u64,
}

impl DataCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            rate: RateCalculator::new(now),
            packets: 0,
            bytes: 0,
        }
    }

    pub fn update(&mut self, size: usize, now: Instant) {
        self.packets += 1;
        self.bytes += size as u64;
        self.rate.update(size, now);
    }

    pub fn rate(&mut self, now: Instant) -> u32 {
        self.rate.rate(now)
    }

    pub fn packet_count(&self) -> u64 {
        self.packets
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}
