//! The dim accumulator (component C5): coalesces a burst of Dim/Bright
//! pulses arriving for the same house into a single `RelativeDim` event.
//!
//! Powerline dimmer switches send one Dim or Bright function per half-cycle
//! doublet while held down; a one-second press generates a dozen or more
//! individual wire events, but the *number* of wire repeats observed for one
//! press isn't the dim-step count directly — TW523 and XTB-523 each apply
//! their own firmware-level relationship between raw repeat count and the
//! 22-step dim scale. A driver supplies that relationship as `dim_func`
//! (`tw523_dim_func`/`xtb_normal_dim_func` below) when constructing an
//! accumulator; an accumulator per house sums the resulting signed steps
//! (Dim subtracts, Bright adds) and emits one coalesced event after the line
//! has been quiet for a second.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::event::{Event, RELATIVE_DIM_STEPS};

/// How long the accumulator waits after the last pulse before it flushes.
pub const FLUSH_DELAY: Duration = Duration::from_secs(1);

/// TW523/PSC05's raw-repeat-count to dim-step relationship: `3n - 1`.
pub fn tw523_dim_func(n: u32) -> i32 {
    3 * n as i32 - 1
}

/// XTB-523 (default, collapsing configuration)'s relationship: `2n`.
pub fn xtb_normal_dim_func(n: u32) -> i32 {
    2 * n as i32
}

struct Inner {
    /// Signed running step count; positive is Bright, negative is Dim.
    steps: i32,
    /// Bumped on every pulse; a pending flush thread checks this against the
    /// value it captured at spawn time and no-ops if it's stale, so only the
    /// most recently scheduled flush ever actually fires.
    generation: u64,
}

/// One house's dim accumulator. Construct one per house that has a live
/// interface, and feed it every Dim/Bright pulse seen for that house.
pub struct DimAccumulator {
    house: u8,
    inner: Arc<Mutex<Inner>>,
    sink: Arc<dyn Fn(Event) + Send + Sync>,
    dim_func: Arc<dyn Fn(u32) -> i32 + Send + Sync>,
}

impl DimAccumulator {
    /// `sink` delivers the coalesced `RelativeDim` event when the flush
    /// fires; it's a plain callback rather than a concrete channel type so
    /// it can forward into whichever queue type the caller uses (a
    /// `crossbeam_channel::Sender`, an `mpsc::Sender`, ...).
    pub fn new(
        house: u8,
        sink: impl Fn(Event) + Send + Sync + 'static,
        dim_func: impl Fn(u32) -> i32 + Send + Sync + 'static,
    ) -> Self {
        DimAccumulator {
            house,
            inner: Arc::new(Mutex::new(Inner {
                steps: 0,
                generation: 0,
            })),
            sink: Arc::new(sink),
            dim_func: Arc::new(dim_func),
        }
    }

    /// Record one Dim (`bright = false`) or Bright (`bright = true`) pulse
    /// reporting `repeat_count` raw wire repeats, and (re)schedule the flush
    /// a second out from now.
    pub fn pulse(&self, bright: bool, repeat_count: u32) {
        let contribution = (self.dim_func)(repeat_count);
        let generation = {
            let mut inner = self.inner.lock().unwrap();
            inner.steps += if bright { contribution } else { -contribution };
            inner.generation += 1;
            inner.generation
        };

        let inner = Arc::clone(&self.inner);
        let sink = self.sink.clone();
        let house = self.house;
        thread::spawn(move || {
            thread::sleep(FLUSH_DELAY);
            let mut inner = inner.lock().unwrap();
            if inner.generation != generation {
                // A later pulse rescheduled the flush; this one is stale.
                return;
            }
            let steps = std::mem::replace(&mut inner.steps, 0);
            drop(inner);
            if steps == 0 {
                return;
            }
            let clamped = steps.clamp(
                -(RELATIVE_DIM_STEPS as i32),
                RELATIVE_DIM_STEPS as i32,
            );
            let dim = clamped as f64 / RELATIVE_DIM_STEPS as f64;
            sink(Event::RelativeDim { house, dim });
        });
    }
}
