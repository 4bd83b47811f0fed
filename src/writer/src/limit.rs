use crate::error::{OutputError, Result};

/// Counts down the events an output stage may still write.
///
/// `None` means unlimited. Reaching zero stops further writes but leaves the
/// job free to shut down normally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventLimit {
    max: Option<u64>,
    remaining: Option<u64>,
}

impl EventLimit {
    pub fn new(max: Option<u64>) -> Self {
        Self {
            max,
            remaining: max,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn max(&self) -> Option<u64> {
        self.max
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// True once a limited count has been used up
    pub fn reached(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Account for one written event
    pub fn consume(&mut self) -> Result<()> {
        match self.remaining {
            None => Ok(()),
            Some(0) => Err(OutputError::ordering(
                "consume",
                "event limit already reached",
            )),
            Some(n) => {
                self.remaining = Some(n - 1);
                Ok(())
            }
        }
    }
}

impl Default for EventLimit {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_reached() {
        let mut limit = EventLimit::unlimited();
        for _ in 0..1000 {
            limit.consume().unwrap();
        }
        assert!(!limit.reached());
        assert_eq!(limit.remaining(), None);
        assert_eq!(limit.max(), None);
    }

    #[test]
    fn test_counts_down_to_zero() {
        let mut limit = EventLimit::new(Some(2));
        assert!(!limit.reached());
        limit.consume().unwrap();
        assert_eq!(limit.remaining(), Some(1));
        limit.consume().unwrap();
        assert!(limit.reached());

        let err = limit.consume().unwrap_err();
        assert!(matches!(err, OutputError::Ordering { .. }));
        assert_eq!(limit.remaining(), Some(0));
        assert_eq!(limit.max(), Some(2));
    }

    #[test]
    fn test_zero_limit_starts_reached() {
        let limit = EventLimit::new(Some(0));
        assert!(limit.reached());
    }
}
