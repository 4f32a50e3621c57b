use std::sync::{Mutex, MutexGuard};

use rand::{
    Rng, SeedableRng,
    distr::{Distribution, weighted::WeightedIndex},
    rngs::StdRng,
};

/// Balancing algorithms understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceAlgorithm {
    #[default]
    Random,
}

impl BalanceAlgorithm {
    /// Resolve a configured algorithm name. Empty names select the default
    /// quietly, unknown names select it with a warning.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "random" => BalanceAlgorithm::Random,
            other => {
                tracing::warn!(balance = other, "unknown balancing algorithm, using random");
                BalanceAlgorithm::Random
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceAlgorithm::Random => "random",
        }
    }
}

/// Trait defining the interface for load balancing strategies
pub trait LoadBalancingStrategy: Send + Sync + 'static {
    /// Pick the index of one candidate given each candidate's relative weight
    fn select_index(&self, weights: &[u32]) -> Option<usize>;
    /// Create a new instance of this strategy as a boxed trait object
    fn boxed(self) -> Box<dyn LoadBalancingStrategy>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Weighted random selection. With equal weights every candidate is equally likely.
pub struct RandomStrategy {
    rng: Mutex<StdRng>,
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomStrategy {
    /// Create a new random selection strategy seeded from the OS
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic sequence for reproducible distribution tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        // a panic while holding the lock cannot leave the rng in a bad state
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LoadBalancingStrategy for RandomStrategy {
    fn select_index(&self, weights: &[u32]) -> Option<usize> {
        match weights.len() {
            0 => return None,
            1 => return Some(0),
            _ => {}
        }

        let mut rng = self.rng();
        match WeightedIndex::new(weights.iter().copied()) {
            Ok(dist) => Some(dist.sample(&mut *rng)),
            // all-zero weights: fall back to a uniform draw
            Err(_) => Some(rng.random_range(0..weights.len())),
        }
    }
}

/// Factory for creating load balancing strategies from configuration
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    /// Create a strategy for `algorithm`; a seed makes the draw sequence reproducible
    pub fn create_strategy(
        algorithm: BalanceAlgorithm,
        seed: Option<u64>,
    ) -> Box<dyn LoadBalancingStrategy> {
        match algorithm {
            BalanceAlgorithm::Random => match seed {
                Some(seed) => RandomStrategy::with_seed(seed).boxed(),
                None => RandomStrategy::new().boxed(),
            },
        }
    }
}
