use std::collections::HashMap;
use std::sync::RwLock;

use ep1_core::error::Ep1Error;
use ep1_core::types::PublicKeyBytes;
use serde::{Deserialize, Serialize};

/// One staked validator. Equality is by identifier bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Validator {
    pub public_key: PublicKeyBytes,
    pub stake: u64,
    pub active: bool,
    /// Reserved for future schedule weighting.
    pub reputation: u32,
    /// Reserved for future schedule weighting.
    pub activity: u32,
}

impl Validator {
    pub fn new(public_key: PublicKeyBytes, stake: u64) -> Self {
        Self {
            public_key,
            stake,
            active: true,
            reputation: 0,
            activity: 0,
        }
    }
}

impl PartialEq for Validator {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for Validator {}

/// The validator set and its stake-weighted proposer schedule.
///
/// The schedule is pure: picture a virtual list of length S = Σ stake where
/// each validator appears stake times, validators in ascending identifier
/// order; the proposer for height h is element (h − 1) mod S. Reorgs simply
/// re-derive it.
pub struct ValidatorRegistry {
    inner: RwLock<HashMap<Vec<u8>, Validator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, validator: Validator) {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .insert(validator.public_key.as_bytes().to_vec(), validator);
    }

    pub fn remove(&self, id: &[u8]) {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .remove(id);
    }

    pub fn get(&self, id: &[u8]) -> Option<Validator> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_stake(&self) -> u64 {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .values()
            .filter(|v| v.active)
            .map(|v| v.stake)
            .sum()
    }

    /// The validator entitled to propose at `height`.
    pub fn proposer_for_height(&self, height: u64) -> Result<Validator, Ep1Error> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut eligible: Vec<&Validator> = inner
            .values()
            .filter(|v| v.active && v.stake > 0)
            .collect();
        eligible.sort_by(|a, b| a.public_key.as_bytes().cmp(b.public_key.as_bytes()));

        let total: u64 = eligible.iter().map(|v| v.stake).sum();
        if total == 0 {
            return Err(Ep1Error::InvalidEngineConfig(
                "validator set is empty".into(),
            ));
        }

        let index = height.saturating_sub(1) % total;
        let mut cursor = 0u64;
        for validator in eligible {
            cursor += validator.stake;
            if index < cursor {
                return Ok(validator.clone());
            }
        }
        unreachable!("index is always below the cumulative stake")
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(tag: u8, stake: u64) -> Validator {
        Validator::new(PublicKeyBytes::from_bytes(vec![tag; 65]), stake)
    }

    #[test]
    fn empty_set_is_a_distinct_error() {
        let registry = ValidatorRegistry::new();
        assert!(matches!(
            registry.proposer_for_height(1),
            Err(Ep1Error::InvalidEngineConfig(_))
        ));
    }

    #[test]
    fn schedule_is_exactly_stake_proportional() {
        let registry = ValidatorRegistry::new();
        registry.add(validator(1, 100));
        registry.add(validator(2, 50));
        registry.add(validator(3, 25));

        let mut counts: HashMap<Vec<u8>, u64> = HashMap::new();
        for height in 1..=350u64 {
            let proposer = registry.proposer_for_height(height).unwrap();
            *counts
                .entry(proposer.public_key.as_bytes().to_vec())
                .or_default() += 1;
        }
        // 350 draws = 2 full rotations of the 175-slot virtual list.
        assert_eq!(counts[&vec![1u8; 65]], 200);
        assert_eq!(counts[&vec![2u8; 65]], 100);
        assert_eq!(counts[&vec![3u8; 65]], 50);
    }

    #[test]
    fn schedule_is_deterministic() {
        let registry = ValidatorRegistry::new();
        registry.add(validator(9, 7));
        registry.add(validator(4, 3));
        for height in 1..=30u64 {
            let a = registry.proposer_for_height(height).unwrap();
            let b = registry.proposer_for_height(height).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn inactive_and_zero_stake_validators_are_skipped() {
        let registry = ValidatorRegistry::new();
        let mut idle = validator(1, 100);
        idle.active = false;
        registry.add(idle);
        registry.add(validator(2, 0));
        registry.add(validator(3, 5));

        for height in 1..=10u64 {
            let proposer = registry.proposer_for_height(height).unwrap();
            assert_eq!(proposer.public_key.as_bytes(), &[3u8; 65]);
        }
    }

    #[test]
    fn rotation_wraps_around_total_stake() {
        let registry = ValidatorRegistry::new();
        registry.add(validator(1, 2));
        registry.add(validator(2, 1));
        // Virtual list: [v1, v1, v2] repeated.
        let picks: Vec<u8> = (1..=6u64)
            .map(|h| registry.proposer_for_height(h).unwrap().public_key.as_bytes()[0])
            .collect();
        assert_eq!(picks, vec![1, 1, 2, 1, 1, 2]);
    }
}
