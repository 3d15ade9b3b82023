//! Worker-set reconciliation plan
//!
//! Pure diff between the live worker ids and a target count. Workers are
//! removed from the end of the live list (highest index first) and new ones
//! get fresh ids.

/// Identifier of a worker inside one pool
pub type WorkerId = u64;

/// What a reconciliation pass has to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Ids of workers to start, in start order
    pub create: Vec<WorkerId>,
    /// Ids of workers to stop, in stop order
    pub remove: Vec<WorkerId>,
}

impl ReconcilePlan {
    /// Compute the plan for `live` workers and a `target` count.
    ///
    /// `next_id` is the first unused worker id.
    pub fn compute(live: &[WorkerId], target: usize, next_id: WorkerId) -> Self {
        let current = live.len();

        if current > target {
            Self {
                create: Vec::new(),
                remove: live[target..].iter().rev().copied().collect(),
            }
        } else {
            let missing = (target - current) as u64;
            Self {
                create: (next_id..next_id + missing).collect(),
                remove: Vec::new(),
            }
        }
    }

    /// Check if the worker set already matches
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.remove.is_empty()
    }
}
