//! Process-wide record of blocking events.
//!
//! Code that waits (on a lock, a channel, a condition variable) reports how
//! long it waited, either with [`record`], with a [`BlockTimer`], or with the
//! [`blocking!`](crate::blocking) macro. Events are aggregated per call site
//! and sampled according to the rate set with [`set_rate`].

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

static RATE: AtomicU64 = AtomicU64::new(0);
static REGISTRY: Lazy<Mutex<HashMap<&'static str, SiteStats>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteStats {
    pub count: u64,
    pub total_ns: u64,
}

/// Sets the sampling rate in nanoseconds. 0 disables recording, 1 records
/// every event. With a larger rate, events blocking at least `rate` ns are
/// always recorded and shorter ones with probability `waited / rate`.
pub fn set_rate(rate: u64) {
    RATE.store(rate, Ordering::Relaxed);
}

pub fn rate() -> u64 {
    RATE.load(Ordering::Relaxed)
}

pub fn reset() {
    REGISTRY.lock().clear();
}

pub fn record(site: &'static str, waited: Duration) {
    let rate = rate();
    if rate == 0 {
        return;
    }
    let waited_ns = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
    if !sampled(rate, waited_ns) {
        return;
    }

    let mut registry = REGISTRY.lock();
    let stats = registry.entry(site).or_default();
    stats.count += 1;
    stats.total_ns = stats.total_ns.saturating_add(waited_ns);
}

fn sampled(rate: u64, waited_ns: u64) -> bool {
    if rate <= 1 || waited_ns >= rate {
        return true;
    }
    rand::random::<f64>() < waited_ns as f64 / rate as f64
}

/// Aggregated events, longest total wait first.
pub fn snapshot() -> Vec<(&'static str, SiteStats)> {
    let mut sites: Vec<_> = REGISTRY
        .lock()
        .iter()
        .map(|(site, stats)| (*site, *stats))
        .collect();
    sites.sort_by(|a, b| b.1.total_ns.cmp(&a.1.total_ns).then(a.0.cmp(b.0)));
    sites
}

pub fn write_snapshot<W: Write>(w: &mut W) -> io::Result<()> {
    writeln!(w, "--- contention:")?;
    writeln!(w, "cycles/second=1000000000")?;
    writeln!(w, "sampling period={}", rate())?;
    for (site, stats) in snapshot() {
        writeln!(w, "{} {} @ {}", stats.total_ns, stats.count, site)?;
    }
    w.flush()
}

/// Records the time between its creation and drop as one blocking event.
#[must_use = "the wait is recorded when the timer is dropped"]
pub struct BlockTimer {
    site: &'static str,
    start: Instant,
}

impl Drop for BlockTimer {
    fn drop(&mut self) {
        record(self.site, self.start.elapsed());
    }
}

pub fn timer(site: &'static str) -> BlockTimer {
    BlockTimer {
        site,
        start: Instant::now(),
    }
}
