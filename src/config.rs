//! Tunables of a `HazardDomain`.

use error::{Error, Result};

cfg_if! {
    if #[cfg(feature = "max_slots_1024")] {
        pub const MAX_SLOTS: usize = 1024;
    } else if #[cfg(feature = "max_slots_16")] {
        pub const MAX_SLOTS: usize = 16;
    } else {
        /// Default capacity of the hazard slot table, i.e. the number of threads that may use a
        /// domain at the same time.
        pub const MAX_SLOTS: usize = 128;
    }
}

/// Default length of a thread's retired list that triggers a reclamation pass.
pub const RECLAIM_THRESHOLD: usize = 64;

/// `max_slots` bounds how many live threads can hold a hazard slot at once; it is the only way
/// slot acquisition can fail. `reclaim_threshold` trades reclamation latency against the cost
/// of scanning every slot: a pass is `O(max_slots + retired)`. A pass only destroys entries
/// nobody publishes, so when more than `reclaim_threshold` of a thread's entries stay hazarded
/// (possible when `reclaim_threshold < max_slots`, as with the defaults), every further `retire`
/// of that thread runs a full pass until the hazards go away. Raise `reclaim_threshold` above
/// `max_slots` when many threads hold hazards for long.
///
/// # Examples
///
/// ```
/// use hazard_stack::config::Config;
///
/// let conf = Config::default().with_max_slots(8).with_reclaim_threshold(4);
/// assert_eq!(conf.max_slots, 8);
/// assert!(conf.validate().is_ok());
/// assert!(conf.with_max_slots(0).validate().is_err());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub max_slots: usize,
    pub reclaim_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_slots: MAX_SLOTS,
            reclaim_threshold: RECLAIM_THRESHOLD,
        }
    }
}

impl Config {
    #[inline]
    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    #[inline]
    pub fn with_reclaim_threshold(mut self, reclaim_threshold: usize) -> Self {
        self.reclaim_threshold = reclaim_threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if 0 == self.max_slots {
            warn!("invalid config {:?}", self);
            return Err(Error::InvalidConfig("max_slots must be positive"));
        }
        if 0 == self.reclaim_threshold {
            warn!("invalid config {:?}", self);
            return Err(Error::InvalidConfig("reclaim_threshold must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use config::{Config, MAX_SLOTS, RECLAIM_THRESHOLD};
    use error::Error;

    #[test]
    fn test_default() {
        let conf = Config::default();
        assert_eq!(conf.max_slots, MAX_SLOTS);
        assert_eq!(conf.reclaim_threshold, RECLAIM_THRESHOLD);
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            Config::default().with_reclaim_threshold(0).validate(),
            Err(Error::InvalidConfig("reclaim_threshold must be positive"))
        );
        assert_eq!(
            Config::default().with_max_slots(0).validate(),
            Err(Error::InvalidConfig("max_slots must be positive"))
        );
    }
}
