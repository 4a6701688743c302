use log::{debug, warn};
use rand::seq::index;
use rand::Rng;
use std::collections::HashSet;

use crate::core::error::FitError;
use crate::core::random::Seed;

/// Draws `num_fits` distinct subsets of `subset_size` structure indices from a
/// pool of `pool_size`.
///
/// Each subset is sorted ascending; no two subsets hold the same indices. When
/// `subset_size == pool_size` only one subset exists, so exactly one is returned
/// whatever `num_fits` asks for.
pub fn sample(
    num_fits: usize,
    pool_size: usize,
    subset_size: usize,
    seed: &mut Seed,
) -> Result<Vec<Vec<usize>>, FitError> {
    seed.with_rng(|rng| sample_with_rng(num_fits, pool_size, subset_size, rng))
}

pub fn sample_with_rng<R: Rng + ?Sized>(
    num_fits: usize,
    pool_size: usize,
    subset_size: usize,
    rng: &mut R,
) -> Result<Vec<Vec<usize>>, FitError> {
    for (name, value) in [("num_fits", num_fits), ("pool_size", pool_size), ("subset_size", subset_size)] {
        if value == 0 {
            return Err(FitError::InvalidArgument(format!("{} must be a positive integer", name)));
        }
    }
    if subset_size > pool_size {
        return Err(FitError::InvalidArgument(format!(
            "subset_size ({}) cannot exceed pool_size ({})",
            subset_size, pool_size
        )));
    }

    if subset_size == pool_size {
        if num_fits > 1 {
            warn!(
                "subset_size equals pool_size ({}); only one distinct subset exists, returning 1 instead of {}",
                pool_size, num_fits
            );
        }
        return Ok(vec![(0..pool_size).collect()]);
    }

    let available = binomial(pool_size, subset_size);
    if (num_fits as u128) > available {
        return Err(FitError::InvalidArgument(format!(
            "requested {} distinct subsets but only {} subsets of size {} exist in a pool of {}",
            num_fits, available, subset_size, pool_size
        )));
    }

    let mut seen: HashSet<Vec<usize>> = HashSet::with_capacity(num_fits);
    let mut subsets = Vec::with_capacity(num_fits);
    let mut draws = 0usize;

    while subsets.len() < num_fits {
        draws += 1;
        let mut subset = index::sample(rng, pool_size, subset_size).into_vec();
        subset.sort_unstable();
        // Sorted vectors compare as sets.
        if seen.insert(subset.clone()) {
            subsets.push(subset);
        }
    }

    debug!("Sampled {} subsets in {} draws", subsets.len(), draws);
    Ok(subsets)
}

/// Draws `num_sets` distinct held-out subsets of `size` indices from a pool of
/// `pool_size`, never picking any index in `exclude`.
///
/// Used to score a fitted potential on structures it was not fitted to.
pub fn validation_sets(
    num_sets: usize,
    pool_size: usize,
    size: usize,
    exclude: &[usize],
    seed: &mut Seed,
) -> Result<Vec<Vec<usize>>, FitError> {
    if let Some(&bad) = exclude.iter().find(|&&i| i >= pool_size) {
        return Err(FitError::InvalidArgument(format!(
            "excluded index {} is outside the pool of {}",
            bad, pool_size
        )));
    }
    let remaining: Vec<usize> = (0..pool_size).filter(|i| !exclude.contains(i)).collect();
    if remaining.is_empty() {
        return Err(FitError::InvalidArgument(
            "every structure is excluded; nothing left to validate against".into(),
        ));
    }

    let picks = seed.with_rng(|rng| sample_with_rng(num_sets, remaining.len(), size, rng))?;
    Ok(picks
        .into_iter()
        .map(|set| set.into_iter().map(|i| remaining[i]).collect())
        .collect())
}

/// `n choose k`, saturating at `u128::MAX`.
fn binomial(n: usize, k: usize) -> u128 {
    let k = k.min(n - k) as u128;
    let n = n as u128;
    let mut acc: u128 = 1;
    for i in 0..k {
        acc = match acc.checked_mul(n - i) {
            Some(v) => v / (i + 1),
            None => return u128::MAX,
        };
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::binomial;

    #[test]
    fn binomial_small_values() {
        assert_eq!(binomial(5, 2), 10);
        assert_eq!(binomial(7, 1), 7);
        assert_eq!(binomial(10, 0), 1);
        assert_eq!(binomial(10, 10), 1);
    }
}
