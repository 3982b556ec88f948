use std::sync::atomic::{AtomicU64, Ordering};

use ep1_core::error::Ep1Error;

/// Per-execution gas accountant.
///
/// `consume` is an atomic add-and-compare so host callbacks from concurrent
/// guests stay correct; crossing the limit clamps `consumed` to the limit.
/// Guest instruction cost reported by the runtime is recorded separately so
/// host-function and instruction charges remain distinguishable.
pub struct GasTank {
    limit: u64,
    consumed: AtomicU64,
    wasm_instruction_cost: AtomicU64,
}

impl GasTank {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            consumed: AtomicU64::new(0),
            wasm_instruction_cost: AtomicU64::new(0),
        }
    }

    /// Charge `amount` gas. Returns `OutOfGas` once the limit is crossed.
    pub fn consume(&self, amount: u64) -> Result<(), Ep1Error> {
        let prev = self.consumed.fetch_add(amount, Ordering::SeqCst);
        let next = prev.saturating_add(amount);
        if next > self.limit {
            self.consumed.store(self.limit, Ordering::SeqCst);
            return Err(Ep1Error::OutOfGas);
        }
        Ok(())
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst).min(self.limit)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.consumed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed() >= self.limit
    }

    /// Record the instruction cost the WASM runtime reported for this run.
    pub fn record_wasm_cost(&self, cost: u64) {
        self.wasm_instruction_cost.store(cost, Ordering::SeqCst);
    }

    pub fn wasm_cost(&self) -> u64 {
        self.wasm_instruction_cost.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_within_limit_accumulates() {
        let tank = GasTank::new(100);
        tank.consume(40).unwrap();
        tank.consume(40).unwrap();
        assert_eq!(tank.consumed(), 80);
        assert_eq!(tank.remaining(), 20);
        assert!(!tank.is_exhausted());
    }

    #[test]
    fn crossing_the_limit_clamps_and_errors() {
        let tank = GasTank::new(100);
        tank.consume(90).unwrap();
        assert_eq!(tank.consume(20), Err(Ep1Error::OutOfGas));
        assert_eq!(tank.consumed(), 100);
        assert_eq!(tank.remaining(), 0);
        assert!(tank.is_exhausted());
    }

    #[test]
    fn exhausted_tank_rejects_every_charge() {
        let tank = GasTank::new(10);
        let _ = tank.consume(10);
        assert_eq!(tank.consume(1), Err(Ep1Error::OutOfGas));
        assert_eq!(tank.consumed(), 10);
    }

    #[test]
    fn wasm_cost_is_tracked_separately() {
        let tank = GasTank::new(100);
        tank.consume(30).unwrap();
        tank.record_wasm_cost(55);
        assert_eq!(tank.consumed(), 30);
        assert_eq!(tank.wasm_cost(), 55);
    }

    #[test]
    fn concurrent_consumers_never_exceed_the_limit() {
        use std::sync::Arc;
        let tank = Arc::new(GasTank::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tank = Arc::clone(&tank);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let _ = tank.consume(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tank.consumed(), 1_000);
    }
}
