//! Local resource accounting and admission control (spec.md §4.3).
//!
//! Mutated only from the scheduler loop (spec.md §5), so a plain
//! `std::sync::Mutex` over a `BTreeMap` is enough; there is no cross-task
//! contention to optimize away.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::warn;

use crate::error::BudgetError;
use crate::model::Commit;

/// A resource request: CPU cores and memory in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resources {
    pub cpu: u32,
    pub memory: u64,
}

/// Allocation key: (commit, context). Keying on the commit, not just the
/// context, prevents two commits of the same PR (a branch pushed mid-scan)
/// from sharing a slot -- see DESIGN.md.
type AllocationKey = (Commit, String);

/// Local CPU/memory budget with admission control over concurrent task
/// execution on this machine.
pub struct ResourceBudget {
    total: Resources,
    allocations: Mutex<BTreeMap<AllocationKey, Resources>>,
}

impl ResourceBudget {
    /// Create a budget from the machine's total capacity, probed once at
    /// runner startup.
    pub fn new(total: Resources) -> Self {
        ResourceBudget {
            total,
            allocations: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn total(&self) -> Resources {
        self.total
    }

    fn used(&self, allocations: &BTreeMap<AllocationKey, Resources>) -> Resources {
        allocations.values().fold(
            Resources { cpu: 0, memory: 0 },
            |acc, r| Resources {
                cpu: acc.cpu + r.cpu,
                memory: acc.memory + r.memory,
            },
        )
    }

    pub fn available(&self) -> Resources {
        let allocations = self.allocations.lock().unwrap();
        let used = self.used(&allocations);
        Resources {
            cpu: self.total.cpu.saturating_sub(used.cpu),
            memory: self.total.memory.saturating_sub(used.memory),
        }
    }

    /// Try to admit a task's resource request. If the task's topology does
    /// not specify resources, callers should pass `self.total()` as
    /// `requested` -- exclusive use is the default, not an empty request
    /// (spec.md §4.3).
    pub fn allocate(
        &self,
        commit: Commit,
        context: impl Into<String>,
        requested: Resources,
    ) -> Result<(), BudgetError> {
        let mut allocations = self.allocations.lock().unwrap();
        let used = self.used(&allocations);
        let would_use_cpu = used.cpu + requested.cpu;
        let would_use_mem = used.memory + requested.memory;

        if would_use_cpu > self.total.cpu || would_use_mem > self.total.memory {
            return Err(BudgetError::InsufficientResources {
                cpu: requested.cpu,
                memory: requested.memory,
                avail_cpu: self.total.cpu.saturating_sub(used.cpu),
                avail_memory: self.total.memory.saturating_sub(used.memory),
            });
        }

        allocations.insert((commit, context.into()), requested);
        Ok(())
    }

    /// Release an allocation. Idempotent: releasing an unknown key logs a
    /// warning and otherwise does nothing, since the Executor always calls
    /// this on completion regardless of outcome.
    pub fn release(&self, commit: &Commit, context: &str) {
        let mut allocations = self.allocations.lock().unwrap();
        if allocations.remove(&(commit.clone(), context.to_string())).is_none() {
            warn!(%commit, context, "released unknown resource allocation");
        }
    }

    /// Whether the budget is below the free-below-minimum thresholds that
    /// cause the scheduler to sleep instead of attempting new claims.
    pub fn below_minimum(&self, min_cpu: u32, min_memory: u64) -> bool {
        let avail = self.available();
        avail.cpu < min_cpu || avail.memory < min_memory
    }
}
