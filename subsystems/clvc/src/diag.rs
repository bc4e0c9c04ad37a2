//! # Diagnostics
//!
//! Breakpoint-style fault reporting. Faults never stop the firmware; they are
//! logged, counted, and the most recent one is kept for offline analysis
//! through the status query.

use crate::error::Error;

/// Where a fault was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSite {
    /// Hardware-failsafe poison window
    PoisonHwFailsafe,
    /// BA poison window
    PoisonBa,
    /// Droopy poison window
    PoisonDroopy,
    /// Controller evaluation
    Eval,
    /// Frequency cap programming
    FrequencyCap,
    /// Power-gating vote
    GatingVote,
    /// Final delta application
    Apply,
}

impl FaultSite {
    /// Poison faults are expected under heavy throttling and are only warnings
    #[inline]
    pub fn is_warning(self) -> bool {
        matches!(
            self,
            Self::PoisonHwFailsafe | Self::PoisonBa | Self::PoisonDroopy
        )
    }
}

/// One recorded fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    /// Detection site
    pub site: FaultSite,
    /// Error that was raised
    pub error: Error,
    /// Controller index, when the fault belongs to one controller
    pub controller: Option<u8>,
}

/// Fault counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Total faults recorded
    pub faults: u32,
    /// Poison windows with engaged time larger than eval time
    pub counter_overflows: u32,
    /// Poison windows with no elapsed eval time
    pub empty_windows: u32,
    /// Most recent fault
    pub last_fault: Option<Fault>,
}

impl Diagnostics {
    /// Create empty counters
    pub const fn new() -> Self {
        Self {
            faults: 0,
            counter_overflows: 0,
            empty_windows: 0,
            last_fault: None,
        }
    }

    /// Record a fault
    pub fn breakpoint(&mut self, site: FaultSite, error: Error, controller: Option<u8>) {
        if site.is_warning() {
            log::warn!(
                "clvc: {:?} fault on controller {:?}: {}",
                site,
                controller,
                error
            );
        } else {
            log::error!(
                "clvc: {:?} fault on controller {:?}: {}",
                site,
                controller,
                error
            );
        }

        self.faults = self.faults.wrapping_add(1);
        match error {
            Error::Overflow => self.counter_overflows = self.counter_overflows.wrapping_add(1),
            Error::NotQueried => self.empty_windows = self.empty_windows.wrapping_add(1),
            _ => {},
        }
        self.last_fault = Some(Fault {
            site,
            error,
            controller,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_counts() {
        let mut diag = Diagnostics::new();
        diag.breakpoint(FaultSite::PoisonBa, Error::Overflow, Some(2));
        diag.breakpoint(FaultSite::PoisonDroopy, Error::NotQueried, Some(2));
        assert_eq!(diag.faults, 2);
        assert_eq!(diag.counter_overflows, 1);
        assert_eq!(diag.empty_windows, 1);
        assert_eq!(
            diag.last_fault,
            Some(Fault {
                site: FaultSite::PoisonDroopy,
                error: Error::NotQueried,
                controller: Some(2),
            })
        );
    }

    #[test]
    fn test_hal_fault_is_not_a_poison_counter() {
        let mut diag = Diagnostics::new();
        diag.breakpoint(FaultSite::Apply, Error::InvalidState, None);
        assert_eq!(diag.faults, 1);
        assert_eq!(diag.counter_overflows, 0);
        assert_eq!(diag.last_fault.map(|f| f.site), Some(FaultSite::Apply));
    }

    #[test]
    fn test_warning_sites() {
        assert!(FaultSite::PoisonHwFailsafe.is_warning());
        assert!(!FaultSite::Apply.is_warning());
    }
}
