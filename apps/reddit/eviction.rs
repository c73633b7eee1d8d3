/// How the table is kept near a bounded size. One policy per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Disabled,
    /// After each committed batch, delete as many of the oldest rows as the
    /// batch added net-new ids, but never below `floor` rows.
    ExactCycle { floor: u64 },
    /// Once the table holds `capacity` rows, delete the oldest batch-size
    /// rows before writing the next batch.
    FixedCycle { capacity: u64 },
}

impl EvictionPolicy {
    /// Rows to delete before the upsert, given the row count seen beforehand.
    pub fn before_upsert(&self, batch_size: u64, rows_before: u64) -> u64 {
        match *self {
            EvictionPolicy::FixedCycle { capacity } if rows_before >= capacity => batch_size,
            _ => 0,
        }
    }

    /// Rows to delete after a committed upsert. `already_present` is how many
    /// ids of the batch existed before it was written.
    pub fn after_upsert(&self, batch_size: u64, already_present: u64, rows_after: u64) -> u64 {
        match *self {
            EvictionPolicy::ExactCycle { floor } => {
                let new_count = batch_size.saturating_sub(already_present);
                new_count.min(rows_after.saturating_sub(floor))
            }
            _ => 0,
        }
    }

    /// Whether a write refused for lack of storage should trigger an
    /// eviction and a single retry.
    pub fn evicts_on_storage_full(&self) -> bool {
        matches!(self, EvictionPolicy::FixedCycle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_cycle_evicts_net_new_rows() {
        let policy = EvictionPolicy::ExactCycle { floor: 0 };
        // 200 rows, 50 fetched of which 10 already stored: 240 after upsert
        assert_eq!(policy.after_upsert(50, 10, 240), 40);
        assert_eq!(policy.before_upsert(50, 200), 0);
    }

    #[test]
    fn exact_cycle_without_new_ids_keeps_everything() {
        let policy = EvictionPolicy::ExactCycle { floor: 0 };
        assert_eq!(policy.after_upsert(50, 50, 200), 0);
        assert_eq!(policy.after_upsert(0, 0, 200), 0);
    }

    #[test]
    fn exact_cycle_respects_floor() {
        let policy = EvictionPolicy::ExactCycle { floor: 100 };
        // filling up: nothing to trim yet
        assert_eq!(policy.after_upsert(50, 0, 50), 0);
        // crossing the floor trims only the overflow
        assert_eq!(policy.after_upsert(50, 0, 120), 20);
        // at steady state every net-new row pushes out an old one
        assert_eq!(policy.after_upsert(50, 20, 130), 30);
    }

    #[test]
    fn fixed_cycle_only_trims_when_full() {
        let policy = EvictionPolicy::FixedCycle { capacity: 500 };
        assert_eq!(policy.before_upsert(50, 499), 0);
        assert_eq!(policy.before_upsert(50, 500), 50);
        assert_eq!(policy.before_upsert(50, 650), 50);
        assert_eq!(policy.after_upsert(50, 0, 550), 0);
        assert!(policy.evicts_on_storage_full());
    }

    #[test]
    fn disabled_never_evicts() {
        let policy = EvictionPolicy::Disabled;
        assert_eq!(policy.before_upsert(50, u64::MAX), 0);
        assert_eq!(policy.after_upsert(50, 0, u64::MAX), 0);
        assert!(!policy.evicts_on_storage_full());
    }
}
