//! Builds the bounded, keys-only queries that select expired rows.

use chrono::{DateTime, Utc};
use tablestore::{Comparison, Filter, MAX_PAGE_SIZE, TableQuery};

use crate::error::{Result, SweepError};
use crate::partition_key::PartitionKeyCodec;
use crate::planner::TimeSlot;

fn check_page_size(page_size: usize) -> Result<()> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(SweepError::InvalidPageSize(page_size));
    }
    Ok(())
}

/// Rows whose partition key is before `cutoff`.
pub fn cutoff_query(
    codec: &PartitionKeyCodec,
    cutoff: DateTime<Utc>,
    page_size: usize,
) -> Result<TableQuery> {
    check_page_size(page_size)?;
    let filter = Filter::partition_key(Comparison::Lt, codec.encode(cutoff));
    Ok(TableQuery::keys_only(filter, page_size))
}

/// Rows whose partition key lies in `[start, end]`.
pub fn range_query(
    codec: &PartitionKeyCodec,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    page_size: usize,
) -> Result<TableQuery> {
    check_page_size(page_size)?;
    let filter = Filter::partition_key(Comparison::Ge, codec.encode(start))
        .and(Filter::partition_key(Comparison::Le, codec.encode(end)));
    Ok(TableQuery::keys_only(filter, page_size))
}

/// Rows inside one planned slot, honouring its open or closed end.
pub fn slot_query(codec: &PartitionKeyCodec, slot: &TimeSlot, page_size: usize) -> Result<TableQuery> {
    if slot.closed {
        return range_query(codec, slot.start, slot.end, page_size);
    }
    check_page_size(page_size)?;
    let filter = Filter::partition_key(Comparison::Ge, codec.encode(slot.start))
        .and(Filter::partition_key(Comparison::Lt, codec.encode(slot.end)));
    Ok(TableQuery::keys_only(filter, page_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tablestore::{PARTITION_KEY, ROW_KEY, RowId};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_page_size_limit_agrees_with_config_validation() {
        use common::testing::TestConfigBuilder;

        let codec = PartitionKeyCodec::default();
        for page_size in [1, MAX_PAGE_SIZE, MAX_PAGE_SIZE + 1] {
            let config = TestConfigBuilder::new()
                .with_account("eu")
                .page_size(page_size)
                .build();
            assert_eq!(
                config.validate().is_ok(),
                cutoff_query(&codec, day(18), page_size).is_ok(),
                "page size {page_size}"
            );
        }
    }

    #[test]
    fn test_cutoff_query() {
        let codec = PartitionKeyCodec::default();
        let query = cutoff_query(&codec, day(18), 100).unwrap();

        assert_eq!(query.filter_string(), "PartitionKey lt '2016-01-18 00:00:00'");
        assert_eq!(query.select, vec![PARTITION_KEY.to_string(), ROW_KEY.to_string()]);
        assert_eq!(query.take, 100);
    }

    #[test]
    fn test_range_query_is_inclusive() {
        let codec = PartitionKeyCodec::default();
        let query = range_query(&codec, day(8), day(11), 50).unwrap();

        assert_eq!(
            query.filter_string(),
            "(PartitionKey ge '2016-01-08 00:00:00') and (PartitionKey le '2016-01-11 00:00:00')"
        );
        assert!(query.filter.matches(&RowId::new("2016-01-08 00:00:00", "a")));
        assert!(query.filter.matches(&RowId::new("2016-01-11 00:00:00", "a")));
        assert!(!query.filter.matches(&RowId::new("2016-01-11 00:00:01", "a")));
    }

    #[test]
    fn test_open_slot_excludes_its_end() {
        let codec = PartitionKeyCodec::default();
        let slot = TimeSlot {
            start: day(8),
            end: day(11),
            closed: false,
        };
        let query = slot_query(&codec, &slot, 100).unwrap();

        assert!(query.filter.matches(&RowId::new("2016-01-10 23:59:59", "a")));
        assert!(!query.filter.matches(&RowId::new("2016-01-11 00:00:00", "a")));
    }

    #[test]
    fn test_page_size_bounds() {
        let codec = PartitionKeyCodec::default();
        assert!(matches!(
            cutoff_query(&codec, day(1), 0),
            Err(SweepError::InvalidPageSize(0))
        ));
        assert!(matches!(
            range_query(&codec, day(1), day(2), 101),
            Err(SweepError::InvalidPageSize(101))
        ));
        assert!(cutoff_query(&codec, day(1), 1).is_ok());
    }
}
