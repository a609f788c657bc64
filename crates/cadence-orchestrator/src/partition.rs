use cadence_core::{CadenceError, CadenceResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// How a campaign's total audience is split across its rounds.
///
/// Every policy yields contiguous, non-overlapping slices that start at 0
/// and sum to the total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// `total / n` each; the remainder goes one by one to the earliest rounds.
    #[default]
    EqualSplit,
    /// `ceil(total / n)` for the leading rounds; the last takes what is left.
    RemainderLast,
    /// Proportional to integer weights, largest-remainder apportionment.
    Weighted { weights: Vec<u32> },
}

/// Split `total` recipients into `rounds` contiguous slices.
pub fn partition(
    total: u64,
    rounds: usize,
    policy: &PartitionPolicy,
) -> CadenceResult<Vec<Range<u64>>> {
    if rounds == 0 {
        return Err(CadenceError::Validation("round count must be positive".into()));
    }
    let n = rounds as u64;
    let counts: Vec<u64> = match policy {
        PartitionPolicy::EqualSplit => {
            let base = total / n;
            let extra = total % n;
            (0..n).map(|i| base + u64::from(i < extra)).collect()
        }
        PartitionPolicy::RemainderLast => {
            let lead = total.div_ceil(n);
            let leading = lead * (n - 1);
            if leading >= total {
                return Err(CadenceError::Validation(format!(
                    "remainder_last cannot split {total} recipients into {rounds} non-empty rounds"
                )));
            }
            let mut counts = vec![lead; rounds - 1];
            counts.push(total - leading);
            counts
        }
        PartitionPolicy::Weighted { weights } => apportion(total, rounds, weights)?,
    };

    let mut slices = Vec::with_capacity(rounds);
    let mut start = 0;
    for count in counts {
        slices.push(start..start + count);
        start += count;
    }
    verify_partition(&slices, total)?;
    Ok(slices)
}

fn apportion(total: u64, rounds: usize, weights: &[u32]) -> CadenceResult<Vec<u64>> {
    if weights.len() != rounds {
        return Err(CadenceError::Validation(format!(
            "weighted partition needs {rounds} weights, got {}",
            weights.len()
        )));
    }
    let sum: u64 = weights.iter().map(|w| u64::from(*w)).sum();
    if sum == 0 {
        return Err(CadenceError::Validation("partition weights sum to zero".into()));
    }

    // Integer quotas plus remainders, computed in u128 to avoid overflow.
    let mut counts = Vec::with_capacity(rounds);
    let mut remainders = Vec::with_capacity(rounds);
    for (i, w) in weights.iter().enumerate() {
        let scaled = u128::from(total) * u128::from(*w);
        counts.push((scaled / u128::from(sum)) as u64);
        remainders.push((scaled % u128::from(sum), i));
    }
    let assigned: u64 = counts.iter().sum();
    // Largest remainder first; ties go to the earlier round.
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, i) in remainders.into_iter().take((total - assigned) as usize) {
        counts[i] += 1;
    }
    Ok(counts)
}

/// Check that `slices` are non-empty, contiguous from 0, and cover exactly `total`.
pub fn verify_partition(slices: &[Range<u64>], total: u64) -> CadenceResult<()> {
    let mut expected_start = 0;
    for (i, slice) in slices.iter().enumerate() {
        if slice.start != expected_start {
            return Err(CadenceError::Validation(format!(
                "round {} starts at {} instead of {expected_start}",
                i + 1,
                slice.start
            )));
        }
        if slice.end <= slice.start {
            return Err(CadenceError::Validation(format!(
                "round {} receives no recipients",
                i + 1
            )));
        }
        expected_start = slice.end;
    }
    if expected_start != total {
        return Err(CadenceError::Validation(format!(
            "rounds cover {expected_start} recipients, expected {total}"
        )));
    }
    Ok(())
}
