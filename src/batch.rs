// src/batch.rs
// Batch splitting for aggregator calls

use crate::errors::{AggregatorError, AggregatorResult};

/// Splits `items` into contiguous chunks of at most `max_size`, preserving order.
///
/// The last chunk may be shorter; empty input yields no chunks.
pub fn split_batches<T>(items: &[T], max_size: usize) -> AggregatorResult<Vec<&[T]>> {
    if max_size == 0 {
        return Err(AggregatorError::Configuration(
            "batch size must be at least 1".to_string(),
        ));
    }
    Ok(items.chunks(max_size).collect())
}

/// Number of batches `split_batches` will produce for `len` items.
pub fn batch_count(len: usize, max_size: usize) -> usize {
    if max_size == 0 {
        return 0;
    }
    (len + max_size - 1) / max_size
}
