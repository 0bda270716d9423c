//! [`LatestOrientation`] – single-slot, most-recent-wins orientation cell.
//!
//! The sampler thread publishes into the cell; the control loop reads from
//! it without waiting for the sensor.  Only the freshest sample (or nothing)
//! is observable: this is not a queue.  Each sample carries its capture time
//! so readers can enforce a staleness bound.

use std::time::{Duration, Instant};

use loco_types::LocoError;
use parking_lot::Mutex;

use crate::transform::Quaternion;

/// One published orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationSample {
    /// Axis-corrected, unit-norm orientation.
    pub quaternion: Quaternion,
    /// When the sample was published.
    pub captured_at: Instant,
    /// Monotonic publish counter, starting at 1.
    pub sequence: u64,
}

impl OrientationSample {
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

#[derive(Debug, Default)]
struct Slot {
    sample: Option<OrientationSample>,
    published: u64,
}

/// Single-slot cell shared between the sampler (writer) and the control loop
/// (reader).  The lock is held only to copy one small value in or out.
#[derive(Debug, Default)]
pub struct LatestOrientation {
    slot: Mutex<Slot>,
}

impl LatestOrientation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot with `quaternion`, returning its sequence number.
    pub fn publish(&self, quaternion: Quaternion) -> u64 {
        let mut slot = self.slot.lock();
        slot.published += 1;
        slot.sample = Some(OrientationSample {
            quaternion,
            captured_at: Instant::now(),
            sequence: slot.published,
        });
        slot.published
    }

    /// The current sample, or `None` if nothing was ever published.
    pub fn latest(&self) -> Option<OrientationSample> {
        self.slot.lock().sample
    }

    /// Number of samples published so far.
    pub fn published(&self) -> u64 {
        self.slot.lock().published
    }

    /// The current orientation, provided it is no older than `max_age`.
    ///
    /// `max_age = None` accepts a sample of any age.
    ///
    /// # Errors
    ///
    /// - [`LocoError::NoOrientation`] if nothing was ever published.
    /// - [`LocoError::StaleOrientation`] if the sample is older than `max_age`.
    pub fn fresh(&self, max_age: Option<Duration>) -> Result<Quaternion, LocoError> {
        let sample = self.latest().ok_or(LocoError::NoOrientation)?;
        if let Some(limit) = max_age {
            let age = sample.age();
            if age > limit {
                return Err(LocoError::StaleOrientation {
                    age_ms: age.as_millis() as u64,
                });
            }
        }
        Ok(sample.quaternion)
    }
}
