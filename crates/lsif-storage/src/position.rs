use crate::model::RangeData;
use lsif_core::{Position, Range};
use std::cmp::Ordering;

/// Where `range` lies relative to `position`.
///
/// `Greater` when the range starts after the position, `Less` when it ends
/// before it, `Equal` when the position falls inside (both ends inclusive).
pub fn compare_position(range: &Range, position: Position) -> Ordering {
    if position.line < range.start.line {
        return Ordering::Greater;
    }
    if position.line > range.end.line {
        return Ordering::Less;
    }
    if position.line == range.start.line && position.character < range.start.character {
        return Ordering::Greater;
    }
    if position.line == range.end.line && position.character > range.end.character {
        return Ordering::Less;
    }
    Ordering::Equal
}

/// Binary search over ranges sorted by start and not overlapping.
pub fn find_range(ordered: &[RangeData], position: Position) -> Option<&RangeData> {
    ordered
        .binary_search_by(|candidate| compare_position(&candidate.range(), position))
        .ok()
        .and_then(|index| ordered.get(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultSetData;
    use proptest::prelude::*;

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> RangeData {
        RangeData {
            start: Position::new(sl, sc),
            end: Position::new(el, ec),
            chain: ResultSetData::default(),
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        let ranges = vec![range(1, 4, 1, 8), range(3, 0, 5, 2)];
        assert_eq!(find_range(&ranges, Position::new(1, 4)), Some(&ranges[0]));
        assert_eq!(find_range(&ranges, Position::new(1, 8)), Some(&ranges[0]));
        assert_eq!(find_range(&ranges, Position::new(4, 100)), Some(&ranges[1]));
        assert_eq!(find_range(&ranges, Position::new(1, 9)), None);
        assert_eq!(find_range(&ranges, Position::new(5, 3)), None);
        assert_eq!(find_range(&ranges, Position::new(0, 0)), None);
    }

    #[test]
    fn empty_slice_has_no_match() {
        assert_eq!(find_range(&[], Position::new(0, 0)), None);
    }

    fn disjoint_ranges() -> impl Strategy<Value = Vec<RangeData>> {
        // one range per line, each starting at a random column
        prop::collection::vec((0u32..40, 0u32..40), 0..64).prop_map(|spans| {
            spans
                .into_iter()
                .enumerate()
                .map(|(line, (start, len))| range(line as u32 * 2, start, line as u32 * 2, start + len))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn binary_search_agrees_with_linear_scan(
            ranges in disjoint_ranges(),
            line in 0u32..140,
            character in 0u32..90,
        ) {
            let position = Position::new(line, character);
            let expected = ranges.iter().find(|r| r.range().contains(position));
            prop_assert_eq!(find_range(&ranges, position), expected);
        }
    }
}
