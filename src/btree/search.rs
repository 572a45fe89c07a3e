//! Node Key Search
//!
//! Leftmost and rightmost searches over the ordered keys of one node, both
//! driven by an O'Neil doubling probe: start at the largest power of two
//! below the key count and halve the step each round. The probe lands next
//! to the boundary between keys `< target` and keys `>= target` (or `<=` for
//! the rightmost variant); a short settle step fixes the final index.
//!
//! For keys `2,3,3,5,7,7,8`:
//!
//! ```text
//! target │ leftmost │ leftmost(lookup) │ rightmost │ rightmost(insert)
//! ───────┼──────────┼──────────────────┼───────────┼──────────────────
//!   1    │   none   │   before first   │   none    │  before first
//!   3    │    1     │        1         │     2     │       2
//!   4    │   none   │        2         │   none    │       2
//!   8    │    6     │        6         │     6     │       6
//!   9    │   none   │        6         │   none    │       6
//! ```

use tracing::trace;

use crate::format::Node;

/// Result position of a node search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Before element 0 (the `extra` child of an internal node)
    BeforeFirst,
    /// Element at this index
    At(usize),
}

/// Ordered keys a search can probe
pub trait SortedKeys {
    fn key_count(&self) -> usize;
    fn key_at(&self, index: usize) -> &[u8];
}

impl<K: AsRef<[u8]>> SortedKeys for [K] {
    fn key_count(&self) -> usize {
        self.len()
    }

    fn key_at(&self, index: usize) -> &[u8] {
        self[index].as_ref()
    }
}

impl SortedKeys for Node {
    fn key_count(&self) -> usize {
        self.len()
    }

    fn key_at(&self, index: usize) -> &[u8] {
        self.key(index)
    }
}

/// Smallest `m` with `2^m >= n` (n >= 1)
fn ceil_log2(n: usize) -> u32 {
    usize::BITS - (n - 1).leading_zeros()
}

/// Doubling probe: an index close to the last key that `goes_right` accepts
fn probe<S, F>(keys: &S, goes_right: F) -> usize
where
    S: SortedKeys + ?Sized,
    F: Fn(&[u8]) -> bool,
{
    let count = keys.key_count();
    let m = ceil_log2(count);
    let mut probe = if m >= 1 { (1usize << (m - 1)) - 1 } else { 0 };
    let mut diff = if m >= 2 { 1usize << (m - 2) } else { 0 };

    while diff > 0 {
        if probe < count && goes_right(keys.key_at(probe)) {
            probe += diff;
        } else {
            probe -= diff;
        }
        diff /= 2;
    }

    probe.min(count - 1)
}

/// Settle a probe onto the last index accepted by `goes_right` (None = no key)
fn settle<S, F>(keys: &S, start: usize, goes_right: F) -> Option<usize>
where
    S: SortedKeys + ?Sized,
    F: Fn(&[u8]) -> bool,
{
    let count = keys.key_count();
    let mut last = Some(start);

    while let Some(i) = last {
        if goes_right(keys.key_at(i)) {
            break;
        }
        last = i.checked_sub(1);
    }
    loop {
        let next = last.map_or(0, |i| i + 1);
        if next < count && goes_right(keys.key_at(next)) {
            last = Some(next);
        } else {
            break;
        }
    }

    last
}

fn slot_after(last: Option<usize>) -> Slot {
    match last {
        Some(i) => Slot::At(i),
        None => Slot::BeforeFirst,
    }
}

/// First element equal to `desired`
///
/// With `for_lookup`, a miss returns the last element below `desired` (the
/// child to descend into), or `BeforeFirst` when every key is greater.
pub fn search_leftmost<S>(keys: &S, desired: &[u8], for_lookup: bool) -> Option<Slot>
where
    S: SortedKeys + ?Sized,
{
    let count = keys.key_count();
    let miss = |slot: Slot| for_lookup.then_some(slot);

    if count == 0 {
        return miss(Slot::BeforeFirst);
    }
    if keys.key_at(count - 1) < desired {
        return miss(Slot::At(count - 1));
    }
    if keys.key_at(0) > desired {
        return miss(Slot::BeforeFirst);
    }

    let below = |key: &[u8]| key < desired;
    let start = probe(keys, below);
    let last_below = settle(keys, start, below);
    trace!(count, start, ?last_below, "leftmost probe");

    let first_not_below = last_below.map_or(0, |i| i + 1);
    if first_not_below < count && keys.key_at(first_not_below) == desired {
        return Some(Slot::At(first_not_below));
    }
    miss(slot_after(last_below))
}

/// Last element equal to `desired`
///
/// With `for_insert`, a miss returns the element after which `desired`
/// belongs, or `BeforeFirst` when every key is greater.
pub fn search_rightmost<S>(keys: &S, desired: &[u8], for_insert: bool) -> Option<Slot>
where
    S: SortedKeys + ?Sized,
{
    let count = keys.key_count();
    let miss = |slot: Slot| for_insert.then_some(slot);

    if count == 0 || keys.key_at(0) > desired {
        return miss(Slot::BeforeFirst);
    }
    let last = keys.key_at(count - 1);
    if last <= desired {
        if last == desired {
            return Some(Slot::At(count - 1));
        }
        return miss(Slot::At(count - 1));
    }

    let not_above = |key: &[u8]| key <= desired;
    let start = probe(keys, not_above);
    let last_not_above = settle(keys, start, not_above);
    trace!(count, start, ?last_not_above, "rightmost probe");

    match last_not_above {
        Some(i) if keys.key_at(i) == desired => Some(Slot::At(i)),
        other => miss(slot_after(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 7] = ["2", "3", "3", "5", "7", "7", "8"];

    fn left(target: &str, for_lookup: bool) -> Option<Slot> {
        search_leftmost(&KEYS[..], target.as_bytes(), for_lookup)
    }

    fn right(target: &str, for_insert: bool) -> Option<Slot> {
        search_rightmost(&KEYS[..], target.as_bytes(), for_insert)
    }

    #[test]
    fn test_leftmost_table() {
        assert_eq!(left("1", false), None);
        assert_eq!(left("1", true), Some(Slot::BeforeFirst));
        assert_eq!(left("2", false), Some(Slot::At(0)));
        assert_eq!(left("2", true), Some(Slot::At(0)));
        assert_eq!(left("3", false), Some(Slot::At(1)));
        assert_eq!(left("3", true), Some(Slot::At(1)));
        assert_eq!(left("4", false), None);
        assert_eq!(left("4", true), Some(Slot::At(2)));
        assert_eq!(left("5", false), Some(Slot::At(3)));
        assert_eq!(left("5", true), Some(Slot::At(3)));
        assert_eq!(left("7", false), Some(Slot::At(4)));
        assert_eq!(left("8", false), Some(Slot::At(6)));
        assert_eq!(left("8", true), Some(Slot::At(6)));
        assert_eq!(left("9", false), None);
        assert_eq!(left("9", true), Some(Slot::At(6)));
    }

    #[test]
    fn test_rightmost_table() {
        assert_eq!(right("1", false), None);
        assert_eq!(right("1", true), Some(Slot::BeforeFirst));
        assert_eq!(right("2", false), Some(Slot::At(0)));
        assert_eq!(right("3", false), Some(Slot::At(2)));
        assert_eq!(right("3", true), Some(Slot::At(2)));
        assert_eq!(right("4", false), None);
        assert_eq!(right("4", true), Some(Slot::At(2)));
        assert_eq!(right("6", true), Some(Slot::At(3)));
        assert_eq!(right("7", false), Some(Slot::At(5)));
        assert_eq!(right("8", false), Some(Slot::At(6)));
        assert_eq!(right("9", false), None);
        assert_eq!(right("9", true), Some(Slot::At(6)));
    }

    #[test]
    fn test_empty_keys() {
        let empty: [&str; 0] = [];
        assert_eq!(search_leftmost(&empty[..], b"a", false), None);
        assert_eq!(
            search_leftmost(&empty[..], b"a", true),
            Some(Slot::BeforeFirst)
        );
        assert_eq!(
            search_rightmost(&empty[..], b"a", true),
            Some(Slot::BeforeFirst)
        );
    }

    #[test]
    fn test_probe_agrees_with_linear_scan() {
        // every count up to 40, keys with runs of duplicates
        for count in 1..=40usize {
            let keys: Vec<String> = (0..count).map(|i| format!("{:03}", (i / 3) * 2)).collect();

            for t in 0..=(count as u32 + 2) {
                let target = format!("{:03}", t);
                let d = target.as_bytes();

                let first_eq = keys.iter().position(|k| k.as_bytes() == d);
                let last_eq = keys.iter().rposition(|k| k.as_bytes() == d);
                let last_below = keys.iter().rposition(|k| k.as_bytes() < d);
                let last_not_above = keys.iter().rposition(|k| k.as_bytes() <= d);

                let expect_left = match first_eq {
                    Some(i) => Slot::At(i),
                    None => slot_after(last_below),
                };
                let expect_right = match last_eq {
                    Some(i) => Slot::At(i),
                    None => slot_after(last_not_above),
                };

                assert_eq!(
                    search_leftmost(&keys[..], d, true),
                    Some(expect_left),
                    "leftmost count={} target={}",
                    count,
                    target
                );
                assert_eq!(
                    search_leftmost(&keys[..], d, false),
                    first_eq.map(Slot::At)
                );
                assert_eq!(
                    search_rightmost(&keys[..], d, true),
                    Some(expect_right),
                    "rightmost count={} target={}",
                    count,
                    target
                );
                assert_eq!(
                    search_rightmost(&keys[..], d, false),
                    last_eq.map(Slot::At)
                );
            }
        }
    }

    #[test]
    fn test_node_keys_are_searchable() {
        let mut node = Node::new_leaf();
        for key in KEYS {
            node.push(key.as_bytes(), 0).unwrap();
        }
        assert_eq!(search_leftmost(&node, b"7", false), Some(Slot::At(4)));
        assert_eq!(search_rightmost(&node, b"7", false), Some(Slot::At(5)));
    }
}
