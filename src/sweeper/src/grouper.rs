//! Groups a page of candidate rows into delete batches.

use common::BatchingPolicy;
use tablestore::{MAX_BATCH_SIZE, RowId};

/// Iterator over the delete batches of one page.
///
/// Each batch is a non-empty slice of the page. With
/// [`BatchingPolicy::Batch`] it is the longest run of consecutive rows
/// sharing the partition key of its first row, capped at
/// [`MAX_BATCH_SIZE`]; with [`BatchingPolicy::Single`] it is one row.
/// Batches are yielded in page order and together cover the page exactly.
#[derive(Debug, Clone)]
pub struct PageBatches<'a> {
    remaining: &'a [RowId],
    policy: BatchingPolicy,
}

/// Split `page` into batches according to `policy`.
pub fn group_page(page: &[RowId], policy: BatchingPolicy) -> PageBatches<'_> {
    PageBatches {
        remaining: page,
        policy,
    }
}

impl<'a> Iterator for PageBatches<'a> {
    type Item = &'a [RowId];

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.remaining.first()?;

        let len = match self.policy {
            BatchingPolicy::Single => 1,
            BatchingPolicy::Batch => self
                .remaining
                .iter()
                .take(MAX_BATCH_SIZE)
                .take_while(|row| row.partition_key == first.partition_key)
                .count(),
        };

        let (batch, rest) = self.remaining.split_at(len);
        self.remaining = rest;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.remaining.len();
        let lower = len.div_ceil(MAX_BATCH_SIZE);
        (lower, Some(len))
    }
}
