//! # Counted-Average Frequency
//!
//! Turns pairs of free-running counter reads into an average frequency.
//!
//! ```text
//!            Δcount (cycles)        cycles · 10⁶
//!   f_kHz = ───────────────── = ─────────────────
//!              Δt (ns)                 ns
//! ```
//!
//! Both counters wrap; differences are taken modulo 2⁶⁴. A zero-length
//! window (no previous sample, re-baselined this instant, or two reads with
//! the same timestamp) yields [`FREQ_SENTINEL_KHZ`] instead of dividing.

use helix_pmu_hal::{ClockCounter, ClockDomain, CounterSource, FrequencySample, MAX_PARTITIONS};

use crate::error::Result;

/// Frequency reported when no averaging window exists
pub const FREQ_SENTINEL_KHZ: u32 = 0;

/// kHz per (cycle / ns)
const KHZ_PER_CYCLE_PER_NS: u128 = 1_000_000;

/// Average frequency between two samples, kHz
///
/// Returns [`FREQ_SENTINEL_KHZ`] when no time has elapsed.
pub fn compute_frequency_khz(prev: FrequencySample, cur: FrequencySample) -> u32 {
    let elapsed_ns = cur.timestamp_ns.wrapping_sub(prev.timestamp_ns);
    if elapsed_ns == 0 {
        return FREQ_SENTINEL_KHZ;
    }

    let cycles = cur.count.wrapping_sub(prev.count);
    let khz = (cycles as u128 * KHZ_PER_CYCLE_PER_NS) / elapsed_ns as u128;
    u32::try_from(khz).unwrap_or(u32::MAX)
}

// =============================================================================
// COUNTED AVERAGE
// =============================================================================

/// Previous-sample cache of one counter
#[derive(Debug, Clone, Copy, Default)]
pub struct CountedAverage {
    prev: Option<FrequencySample>,
    target_khz: u32,
}

impl CountedAverage {
    /// Create an empty cache
    pub const fn new() -> Self {
        Self {
            prev: None,
            target_khz: 0,
        }
    }

    /// Average frequency since the cached sample, then cache `sample`
    pub fn compute(&mut self, sample: FrequencySample) -> u32 {
        let freq = match self.prev {
            Some(prev) => compute_frequency_khz(prev, sample),
            None => FREQ_SENTINEL_KHZ,
        };
        self.prev = Some(sample);
        freq
    }

    /// Re-baseline on `sample` if the requested target changed
    ///
    /// Returns `true` when the window was restarted.
    pub fn update_target(&mut self, target_khz: u32, sample: FrequencySample) -> bool {
        if self.target_khz == target_khz {
            return false;
        }
        self.target_khz = target_khz;
        self.prev = Some(sample);
        true
    }

    /// Re-baseline on `sample` whatever the target
    pub fn restart(&mut self, target_khz: u32, sample: FrequencySample) {
        self.target_khz = target_khz;
        self.prev = Some(sample);
    }

    /// Last target seen, kHz
    #[inline]
    pub fn target_khz(&self) -> u32 {
        self.target_khz
    }

    /// Forget the cached sample
    pub fn clear(&mut self) {
        self.prev = None;
    }
}

// =============================================================================
// FREQUENCY METER
// =============================================================================

/// How a controller reads its clock domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// Single broadcast counter
    Broadcast,
    /// Slowest of the partitions in the mask
    Min(u8),
    /// Fastest of the partitions in the mask
    Max(u8),
}

impl PartitionMode {
    /// Whether the mode names at least one partition when it needs one
    pub fn is_valid(self) -> bool {
        match self {
            Self::Broadcast => true,
            Self::Min(mask) | Self::Max(mask) => mask != 0,
        }
    }

    fn partitions(self) -> u8 {
        match self {
            Self::Broadcast => 0,
            Self::Min(mask) | Self::Max(mask) => mask,
        }
    }
}

/// Counted averages for every counter a controller reads
#[derive(Debug, Clone)]
pub struct FrequencyMeter {
    domain: ClockDomain,
    mode: PartitionMode,
    broadcast: CountedAverage,
    partitions: [CountedAverage; MAX_PARTITIONS],
}

impl FrequencyMeter {
    /// Create a meter for a domain
    pub const fn new(domain: ClockDomain, mode: PartitionMode) -> Self {
        Self {
            domain,
            mode,
            broadcast: CountedAverage::new(),
            partitions: [CountedAverage::new(); MAX_PARTITIONS],
        }
    }

    /// Partition mode in use
    #[inline]
    pub fn mode(&self) -> PartitionMode {
        self.mode
    }

    /// Measure the domain against the currently requested target
    ///
    /// Returns `None` when every counter read gave the sentinel.
    pub fn measure<C>(&mut self, counter: &C, target_khz: u32) -> Result<Option<u32>>
    where
        C: ClockCounter + ?Sized,
    {
        if self.mode == PartitionMode::Broadcast {
            let sample = counter.sample(self.domain, CounterSource::Broadcast)?;
            self.broadcast.update_target(target_khz, sample);
            let khz = self.broadcast.compute(sample);
            return Ok((khz != FREQ_SENTINEL_KHZ).then_some(khz));
        }

        let mut result: Option<u32> = None;
        for part in partitions_in(self.mode.partitions()) {
            let avg = &mut self.partitions[part as usize];
            let sample = counter.sample(self.domain, CounterSource::Partition(part))?;
            avg.update_target(target_khz, sample);
            let khz = avg.compute(sample);
            if khz == FREQ_SENTINEL_KHZ {
                continue;
            }
            result = Some(match (result, self.mode) {
                (None, _) => khz,
                (Some(acc), PartitionMode::Min(_)) => acc.min(khz),
                (Some(acc), _) => acc.max(khz),
            });
        }
        Ok(result)
    }

    /// Restart every window at the current counter values
    pub fn retarget<C>(&mut self, counter: &C, target_khz: u32) -> Result<()>
    where
        C: ClockCounter + ?Sized,
    {
        if self.mode == PartitionMode::Broadcast {
            let sample = counter.sample(self.domain, CounterSource::Broadcast)?;
            self.broadcast.update_target(target_khz, sample);
            return Ok(());
        }
        for part in partitions_in(self.mode.partitions()) {
            let sample = counter.sample(self.domain, CounterSource::Partition(part))?;
            self.partitions[part as usize].update_target(target_khz, sample);
        }
        Ok(())
    }

    /// Drop the window that ends now and start a new one
    ///
    /// Used when the window is known to be skewed, so its average never
    /// reaches the controller.
    pub fn restart<C>(&mut self, counter: &C, target_khz: u32) -> Result<()>
    where
        C: ClockCounter + ?Sized,
    {
        if self.mode == PartitionMode::Broadcast {
            let sample = counter.sample(self.domain, CounterSource::Broadcast)?;
            self.broadcast.restart(target_khz, sample);
            return Ok(());
        }
        for part in partitions_in(self.mode.partitions()) {
            let sample = counter.sample(self.domain, CounterSource::Partition(part))?;
            self.partitions[part as usize].restart(target_khz, sample);
        }
        Ok(())
    }

    /// Forget all cached samples
    pub fn clear(&mut self) {
        self.broadcast.clear();
        for avg in self.partitions.iter_mut() {
            avg.clear();
        }
    }
}

fn partitions_in(mask: u8) -> impl Iterator<Item = u8> {
    (0..MAX_PARTITIONS as u8).filter(move |p| mask & (1 << p) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_pmu_hal::Result as HalResult;

    #[test]
    fn test_frequency_basic() {
        // 1.5 GHz for 10 ms
        let a = FrequencySample::new(0, 0);
        let b = FrequencySample::new(10_000_000, 15_000_000);
        assert_eq!(compute_frequency_khz(a, b), 1_500_000);
    }

    #[test]
    fn test_zero_elapsed_is_sentinel() {
        let a = FrequencySample::new(500, 100);
        let b = FrequencySample::new(500, 900);
        assert_eq!(compute_frequency_khz(a, b), FREQ_SENTINEL_KHZ);
    }

    #[test]
    fn test_counter_wraparound() {
        let a = FrequencySample::new(u64::MAX - 4_999_999, u64::MAX - 999);
        let b = FrequencySample::new(5_000_000, 9_999_000);
        // 10 ms window, 10,000,000 cycles -> 1 GHz
        assert_eq!(compute_frequency_khz(a, b), 1_000_000);
    }

    #[test]
    fn test_first_sample_is_sentinel() {
        let mut avg = CountedAverage::new();
        assert_eq!(
            avg.compute(FrequencySample::new(1_000, 10)),
            FREQ_SENTINEL_KHZ
        );
        assert_eq!(
            avg.compute(FrequencySample::new(1_001_000, 1_000_010)),
            1_000_000
        );
    }

    #[test]
    fn test_retarget_restarts_window() {
        let mut avg = CountedAverage::new();
        avg.update_target(1_000_000, FrequencySample::new(0, 0));
        assert!(!avg.update_target(1_000_000, FrequencySample::new(5_000_000, 1)));

        // Run slowly for 10 ms, then retarget
        avg.compute(FrequencySample::new(10_000_000, 5_000_000));
        assert!(avg.update_target(2_000_000, FrequencySample::new(10_000_000, 5_000_000)));

        // Next window only covers time since the retarget
        let khz = avg.compute(FrequencySample::new(20_000_000, 25_000_000));
        assert_eq!(khz, 2_000_000);
        assert_eq!(avg.target_khz(), 2_000_000);
    }

    struct Parts {
        now_ns: u64,
        khz: [u64; MAX_PARTITIONS],
        bcast_khz: u64,
    }

    impl ClockCounter for Parts {
        fn sample(
            &self,
            _domain: ClockDomain,
            source: CounterSource,
        ) -> HalResult<FrequencySample> {
            let khz = match source {
                CounterSource::Broadcast => self.bcast_khz,
                CounterSource::Partition(p) => self.khz[p as usize],
            };
            Ok(FrequencySample::new(self.now_ns, khz * self.now_ns / 1_000_000))
        }
    }

    #[test]
    fn test_partition_min_max() {
        let mut counter = Parts {
            now_ns: 1_000_000,
            khz: [900_000, 1_100_000, 1_000_000, 0, 0, 0, 0, 0],
            bcast_khz: 1_000_000,
        };
        let mut min = FrequencyMeter::new(ClockDomain::Gpc, PartitionMode::Min(0b111));
        let mut max = FrequencyMeter::new(ClockDomain::Gpc, PartitionMode::Max(0b111));
        let mut bcast = FrequencyMeter::new(ClockDomain::Gpc, PartitionMode::Broadcast);

        // First read re-baselines against the target: no window yet
        assert_eq!(min.measure(&counter, 1_000_000).unwrap(), None);
        assert_eq!(max.measure(&counter, 1_000_000).unwrap(), None);
        assert_eq!(bcast.measure(&counter, 1_000_000).unwrap(), None);

        counter.now_ns = 11_000_000;
        assert_eq!(min.measure(&counter, 1_000_000).unwrap(), Some(900_000));
        assert_eq!(max.measure(&counter, 1_000_000).unwrap(), Some(1_100_000));
        assert_eq!(bcast.measure(&counter, 1_000_000).unwrap(), Some(1_000_000));
    }

    #[test]
    fn test_restart_drops_window() {
        let mut avg = CountedAverage::new();
        avg.update_target(1_000_000, FrequencySample::new(0, 0));
        assert_eq!(
            avg.compute(FrequencySample::new(10_000_000, 10_000_000)),
            1_000_000
        );

        // Clock stopped for 10 ms, that window is thrown away
        avg.restart(1_000_000, FrequencySample::new(20_000_000, 10_000_000));
        assert_eq!(avg.target_khz(), 1_000_000);

        // Without the restart this would average to 500 MHz
        let khz = avg.compute(FrequencySample::new(30_000_000, 20_000_000));
        assert_eq!(khz, 1_000_000);
    }

    #[test]
    fn test_partition_mode_validity() {
        assert!(PartitionMode::Broadcast.is_valid());
        assert!(PartitionMode::Max(0b10).is_valid());
        assert!(!PartitionMode::Min(0).is_valid());
    }
}
