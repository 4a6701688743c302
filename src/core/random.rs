use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Where a stochastic component draws its randomness from.
#[derive(Debug, Clone, Default)]
pub enum Seed {
    /// Fresh OS entropy on every use.
    #[default]
    Entropy,
    /// A new generator seeded with this value on every use, so repeated calls
    /// reproduce the same stream.
    Fixed(u64),
    /// A caller-held generator; each use continues where the last one stopped.
    Stream(ChaCha8Rng),
}

impl Seed {
    pub fn stream(seed: u64) -> Self {
        Seed::Stream(ChaCha8Rng::seed_from_u64(seed))
    }

    /// Runs `f` with the generator this seed designates.
    pub fn with_rng<T>(&mut self, f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
        match self {
            Seed::Entropy => f(&mut ChaCha8Rng::from_entropy()),
            Seed::Fixed(s) => f(&mut ChaCha8Rng::seed_from_u64(*s)),
            Seed::Stream(rng) => f(rng),
        }
    }
}

impl From<Option<u64>> for Seed {
    fn from(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => Seed::Fixed(s),
            None => Seed::Entropy,
        }
    }
}
