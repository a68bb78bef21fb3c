//! Series merging.
//!
//! Per-strategy series are inner-joined on block: a checkpoint survives only
//! if every strategy produced a row for it.

use std::collections::{BTreeMap, HashSet};

use silo_chain::{CollateralRawRecord, StrategyRawRecord};

/// A record tied to one checkpoint.
pub trait Checkpointed {
    fn block(&self) -> u64;
}

impl Checkpointed for StrategyRawRecord {
    fn block(&self) -> u64 {
        self.block
    }
}

impl Checkpointed for CollateralRawRecord {
    fn block(&self) -> u64 {
        self.block
    }
}

/// One merged checkpoint: a value per strategy, in strategy order.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow<R> {
    pub block: u64,
    pub values: Vec<R>,
}

/// Inner-join `series` (one per strategy) on block.
///
/// Output rows are ascending by block. Within one series the first row for a
/// block wins. An empty series list merges to an empty table.
pub fn merge_series<R: Checkpointed + Clone>(series: &[Vec<R>]) -> Vec<MergedRow<R>> {
    let Some((first, rest)) = series.split_first() else {
        return Vec::new();
    };

    let mut joined: BTreeMap<u64, Vec<R>> = BTreeMap::new();
    for row in first {
        joined.entry(row.block()).or_insert_with(|| vec![row.clone()]);
    }

    for other in rest {
        let mut seen = HashSet::new();
        for row in other {
            if !seen.insert(row.block()) {
                continue;
            }
            if let Some(values) = joined.get_mut(&row.block()) {
                values.push(row.clone());
            }
        }
        joined.retain(|block, _| seen.contains(block));
    }

    joined
        .into_iter()
        .map(|(block, values)| MergedRow { block, values })
        .collect()
}
