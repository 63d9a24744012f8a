//! Change inventory and exact-change feasibility
//!
//! Answers one question: can the till dispense amount X exactly with the
//! units it currently holds? Greedy coin change is wrong here - stock runs
//! out and denomination sets are not canonical - so feasibility is a bounded
//! subset-sum DP over achievable amounts.

use crate::domain::types::DenomKey;
use rustc_hash::FxHashMap;

/// Stock of denominations eligible for payout (routed to the recycler).
///
/// Mutated by successful dispenses and by poll-driven resynchronisation.
/// Admission decisions read it but never modify it.
#[derive(Debug, Clone, Default)]
pub struct ChangeInventory {
    stock: FxHashMap<DenomKey, u32>,
}

impl ChangeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_counts(counts: impl IntoIterator<Item = (DenomKey, u32)>) -> Self {
        Self { stock: counts.into_iter().filter(|&(_, c)| c > 0).collect() }
    }

    pub fn count(&self, denom: &DenomKey) -> u32 {
        self.stock.get(denom).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.stock.values().all(|&c| c == 0)
    }

    /// Total dispensable value in minor units
    pub fn total_value(&self) -> i64 {
        self.stock.iter().map(|(k, &c)| k.value_minor * c as i64).sum()
    }

    /// Replace the whole stock with fresh levels from a poll
    pub fn resync(&mut self, counts: impl IntoIterator<Item = (DenomKey, u32)>) {
        self.stock = counts.into_iter().filter(|&(_, c)| c > 0).collect();
    }

    /// Record units leaving the till after a successful dispense
    pub fn remove(&mut self, denom: &DenomKey, units: u32) {
        if let Some(count) = self.stock.get_mut(denom) {
            *count = count.saturating_sub(units);
            if *count == 0 {
                self.stock.remove(denom);
            }
        }
    }

    /// True if some multiset of held units sums exactly to `amount`.
    ///
    /// `can_make(0)` is trivially true (nothing to return). Negative amounts
    /// are never constructible.
    pub fn can_make(&self, amount: i64) -> bool {
        if amount == 0 {
            return true;
        }
        if amount < 0 || amount > self.total_value() {
            return false;
        }
        self.solve(amount).is_some()
    }

    /// Concrete dispense plan summing exactly to `amount`, or None if the
    /// amount is not constructible. Units per denomination never exceed the
    /// held count. Used by the payout path; admission only needs `can_make`.
    pub fn plan_for(&self, amount: i64) -> Option<Vec<(DenomKey, u32)>> {
        if amount == 0 {
            return Some(Vec::new());
        }
        if amount < 0 || amount > self.total_value() {
            return None;
        }
        let (denoms, used) = self.solve(amount)?;

        // Walk the layers backwards, peeling off the units each
        // denomination contributed to the target amount.
        let mut plan = Vec::new();
        let mut remaining = amount as usize;
        for (i, denom) in denoms.iter().enumerate().rev() {
            let units = used[i][remaining];
            if units > 0 {
                plan.push((denom.clone(), units));
                remaining -= denom.value_minor as usize * units as usize;
            }
        }
        debug_assert_eq!(remaining, 0);
        plan.reverse();
        Some(plan)
    }

    /// Layered bounded-knapsack DP.
    ///
    /// Layer i marks the amounts reachable using denominations 0..=i, and
    /// `used[i][a]` records how many units of denomination i the path to `a`
    /// consumed. Returns None when the target amount is unreachable.
    fn solve(&self, amount: i64) -> Option<(Vec<DenomKey>, Vec<Vec<u32>>)> {
        let target = amount as usize;
        let mut reachable = vec![false; target + 1];
        reachable[0] = true;

        let mut denoms: Vec<DenomKey> = Vec::with_capacity(self.stock.len());
        let mut used: Vec<Vec<u32>> = Vec::with_capacity(self.stock.len());

        // Deterministic order keeps plans stable across runs.
        let mut entries: Vec<(&DenomKey, u32)> =
            self.stock.iter().map(|(k, &c)| (k, c)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (denom, count) in entries {
            let value = denom.value_minor as usize;
            if value == 0 || value > target {
                denoms.push(denom.clone());
                used.push(vec![0; target + 1]);
                continue;
            }
            let mut layer_used = vec![0u32; target + 1];
            for a in value..=target {
                if reachable[a] {
                    continue;
                }
                let below = a - value;
                if reachable[below] && layer_used[below] < count {
                    reachable[a] = true;
                    layer_used[a] = layer_used[below] + 1;
                }
            }
            denoms.push(denom.clone());
            used.push(layer_used);
        }

        if reachable[target] {
            Some((denoms, used))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(entries: &[(i64, u32)]) -> ChangeInventory {
        ChangeInventory::from_counts(
            entries.iter().map(|&(v, c)| (DenomKey::new("ISK", v), c)),
        )
    }

    #[test]
    fn test_zero_amount_always_feasible() {
        assert!(inventory(&[]).can_make(0));
        assert!(inventory(&[(100, 1)]).can_make(0));
    }

    #[test]
    fn test_negative_amount_infeasible() {
        assert!(!inventory(&[(100, 5)]).can_make(-100));
    }

    #[test]
    fn test_exact_combination() {
        let inv = inventory(&[(50, 2), (100, 1)]);
        assert!(inv.can_make(50));
        assert!(inv.can_make(100));
        assert!(inv.can_make(150));
        assert!(inv.can_make(200));
        assert!(!inv.can_make(250));
        assert!(!inv.can_make(75));
    }

    #[test]
    fn test_count_cap_respected() {
        // One 200 unit cannot make 400.
        let inv = inventory(&[(200, 1)]);
        assert!(inv.can_make(200));
        assert!(!inv.can_make(400));
    }

    #[test]
    fn test_greedy_would_fail() {
        // Greedy takes the 50 first and strands itself; 20x3 is the only
        // way to 60.
        let inv = inventory(&[(50, 1), (20, 3)]);
        assert!(inv.can_make(60));
        assert!(inv.can_make(110));
        assert!(!inv.can_make(80));
    }

    #[test]
    fn test_exhaustion_only_affects_dependent_amounts() {
        let mut inv = inventory(&[(100, 2), (50, 2)]);
        assert!(inv.can_make(100));
        assert!(inv.can_make(250));

        // Spend both 100s: 100 stays feasible via 50x2, 250 does not.
        inv.remove(&DenomKey::new("ISK", 100), 2);
        assert!(inv.can_make(100));
        assert!(!inv.can_make(250));
    }

    #[test]
    fn test_plan_sums_exactly() {
        let inv = inventory(&[(500, 1), (100, 4), (50, 3)]);
        let plan = inv.plan_for(750).expect("750 should be constructible");
        let total: i64 = plan.iter().map(|(d, u)| d.value_minor * *u as i64).sum();
        assert_eq!(total, 750);
        for (denom, units) in &plan {
            assert!(*units <= inv.count(denom));
        }
    }

    #[test]
    fn test_plan_for_infeasible_amount() {
        assert!(inventory(&[(100, 2)]).plan_for(150).is_none());
        assert_eq!(inventory(&[(100, 2)]).plan_for(0), Some(Vec::new()));
    }

    #[test]
    fn test_remove_and_resync() {
        let mut inv = inventory(&[(100, 2)]);
        inv.remove(&DenomKey::new("ISK", 100), 1);
        assert_eq!(inv.count(&DenomKey::new("ISK", 100)), 1);

        inv.resync([(DenomKey::new("ISK", 50), 4), (DenomKey::new("ISK", 100), 0)]);
        assert_eq!(inv.count(&DenomKey::new("ISK", 50)), 4);
        assert_eq!(inv.count(&DenomKey::new("ISK", 100)), 0);
        assert_eq!(inv.total_value(), 200);
    }
}
