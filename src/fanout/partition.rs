use std::ops::Range;

/// Consecutive index ranges covering `0..len`, each at most `chunk_size` long.
///
/// Only the last range may be shorter. `len == 0` yields no ranges. A
/// `chunk_size` of zero is treated as one.
pub fn chunk_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    (0..len)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(len))
        .collect()
}

/// Move `items` into chunks laid out by `chunk_ranges`, each item tagged with its index
pub fn into_chunks<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<(usize, T)>> {
    let ranges = chunk_ranges(items.len(), chunk_size);
    let mut items = items.into_iter().enumerate();

    ranges
        .into_iter()
        .map(|range| items.by_ref().take(range.len()).collect())
        .collect()
}
