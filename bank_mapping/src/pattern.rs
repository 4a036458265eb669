use core::fmt::{Display, Formatter};

use bitvec::prelude::*;
use rand::Rng;

use crate::{RunConfig, ELEM_LEN};

/// How the cyclic access sequence is laid out over the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternPolicy {
    /// Fixed ascending stride, wraps to 0. Reproducible, but a stride
    /// predictor can follow it.
    Stride,
    /// One uniformly drawn bucket per slot, sampled without replacement.
    /// All entries share the bits below `range_left`, the upper bits vary.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    /// Fewer buckets than cycle slots: sampling without replacement could
    /// never finish.
    BucketExhaustion { buckets: usize, entries: usize },
    /// range_right below range_left, a span that does not fit a usize
    /// shift, or buckets narrower than one element.
    InvalidRange { left: u32, right: u32 },
}

impl Display for PatternError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            PatternError::BucketExhaustion { buckets, entries } => write!(
                f,
                "distance range holds {} buckets but {} entries are required",
                buckets, entries
            ),
            PatternError::InvalidRange { left, right } => {
                write!(f, "invalid distance range [{}, {}]", left, right)
            }
        }
    }
}

/// Sequence for the configured policy, offsets in elements.
pub fn generate(config: &RunConfig, rng: &mut impl Rng) -> Result<Vec<usize>, PatternError> {
    match config.policy {
        PatternPolicy::Stride => Ok(stride_sequence(config.num_entries, config.entry_dist())),
        PatternPolicy::Random => random_sequence(
            config.num_entries,
            config.range_left,
            config.range_right,
            rng,
        ),
    }
}

/// seq[i] = ((i + 1) mod n) * dist: a single ascending cycle wrapping to 0.
pub fn stride_sequence(num_entries: usize, entry_dist: usize) -> Vec<usize> {
    let dist_elems = entry_dist / ELEM_LEN;
    (0..num_entries)
        .map(|i| {
            if i == num_entries - 1 {
                0
            } else {
                (i + 1) * dist_elems
            }
        })
        .collect()
}

/// Assign each cycle slot a distinct bucket of width 2^range_left bytes,
/// drawn uniformly from the 2^(range_right - range_left + 1) buckets of the
/// range. Rejection sampling over an explicit used-set; the capacity check
/// up front keeps the loop finite.
pub fn random_sequence(
    num_entries: usize,
    range_left: u32,
    range_right: u32,
    rng: &mut impl Rng,
) -> Result<Vec<usize>, PatternError> {
    let invalid = PatternError::InvalidRange {
        left: range_left,
        right: range_right,
    };
    if range_right < range_left
        || range_right >= usize::BITS
        || range_right - range_left + 1 >= usize::BITS
    {
        return Err(invalid);
    }
    // Buckets narrower than one element would collapse every offset to 0.
    if (1usize << range_left) < ELEM_LEN {
        return Err(invalid);
    }
    let bucket_count = 1usize << (range_right - range_left + 1);
    if bucket_count < num_entries {
        return Err(PatternError::BucketExhaustion {
            buckets: bucket_count,
            entries: num_entries,
        });
    }
    let width_elems = (1usize << range_left) / ELEM_LEN;

    let mut used = bitvec![0; bucket_count];
    let mut sequence = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        let bucket = loop {
            let candidate = rng.gen_range(0..bucket_count);
            if !used[candidate] {
                break candidate;
            }
        };
        used.set(bucket, true);
        sequence.push(bucket * width_elems);
    }
    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::{ENTRY_DIST, NUM_ENTRIES};

    #[test]
    fn stride_sequence_matches_the_formula() {
        let seq = stride_sequence(NUM_ENTRIES, ENTRY_DIST);
        assert_eq!(seq.len(), NUM_ENTRIES);
        for (i, &offset) in seq.iter().enumerate() {
            assert_eq!(offset, ((i + 1) % NUM_ENTRIES) * (ENTRY_DIST / ELEM_LEN));
        }
    }

    #[test]
    fn stride_sequence_is_one_full_cycle() {
        let seq = stride_sequence(NUM_ENTRIES, ENTRY_DIST);
        let distinct: HashSet<usize> = seq.iter().copied().collect();
        assert_eq!(distinct.len(), NUM_ENTRIES);
        assert_eq!(seq[NUM_ENTRIES - 1], 0);
    }

    #[test]
    fn random_sequence_is_one_full_cycle() {
        let mut rng = StdRng::seed_from_u64(42);
        let seq = random_sequence(NUM_ENTRIES, 17, 22, &mut rng).unwrap();
        assert_eq!(seq.len(), NUM_ENTRIES);
        let distinct: HashSet<usize> = seq.iter().copied().collect();
        assert_eq!(distinct.len(), NUM_ENTRIES);
    }

    #[test]
    fn random_entries_share_the_low_bits() {
        let mut rng = StdRng::seed_from_u64(42);
        let seq = random_sequence(NUM_ENTRIES, 17, 22, &mut rng).unwrap();
        let width_elems = (1usize << 17) / ELEM_LEN;
        for &offset in &seq {
            assert_eq!(offset % width_elems, 0);
        }
        let buckets: HashSet<usize> = seq.iter().map(|o| o / width_elems).collect();
        assert_eq!(buckets.len(), NUM_ENTRIES);
    }

    #[test]
    fn random_sequence_fills_exact_capacity() {
        // 2^(21-17+1) = 32 buckets for 32 entries: every bucket gets used.
        let mut rng = StdRng::seed_from_u64(7);
        let seq = random_sequence(NUM_ENTRIES, 17, 21, &mut rng).unwrap();
        let width_elems = (1usize << 17) / ELEM_LEN;
        let mut buckets: Vec<usize> = seq.iter().map(|o| o / width_elems).collect();
        buckets.sort_unstable();
        assert_eq!(buckets, (0..NUM_ENTRIES).collect::<Vec<usize>>());
    }

    #[test]
    fn bucket_exhaustion_is_rejected_up_front() {
        let mut rng = StdRng::seed_from_u64(0);
        // 2^(20-17+1) = 16 buckets cannot hold 32 entries.
        assert_eq!(
            random_sequence(NUM_ENTRIES, 17, 20, &mut rng),
            Err(PatternError::BucketExhaustion {
                buckets: 16,
                entries: NUM_ENTRIES
            })
        );
    }

    #[test]
    fn subelement_buckets_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            random_sequence(4, 1, 22, &mut rng),
            Err(PatternError::InvalidRange { left: 1, right: 22 })
        );
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            random_sequence(NUM_ENTRIES, 22, 17, &mut rng),
            Err(PatternError::InvalidRange {
                left: 22,
                right: 17
            })
        );
    }
}
