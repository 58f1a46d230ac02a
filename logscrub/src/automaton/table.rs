//! Transition-table storage for the literal automaton.
//!
//! Two layouts share one lookup contract:
//!
//! - [`FlatTable`]: a contiguous `state_count x 256` array of state ids.
//!   One load per byte, 512 B per state.
//! - [`CompressedTable`]: state 0 stays flat (it is hit on most bytes of a
//!   clean record); every other state stores the most frequent target as
//!   `default_next`, a 256-bit presence bitmap and a packed override list
//!   indexed by popcount rank.
//!
//! Match metadata ([`StateMeta`]) lives in its own compact array so the hot
//! transition loads never drag pattern ids and depths into cache.

use itertools::Itertools;

/// Dense automaton state id. Build rejects tries that would not fit in a
/// signed 16-bit id, so `u16::MAX` is free to act as the build-time "no
/// transition" sentinel.
pub(crate) type StateId = u16;

/// Absent transition during trie construction. Never present after build.
pub(crate) const NO_STATE: StateId = StateId::MAX;

/// End of an output chain.
pub(crate) const NO_OUTPUT: u16 = u16::MAX;

const FLAG_FINAL: u8 = 1 << 0;
/// Set when the state is final or its output chain is non-empty, so the scan
/// loop pays a single test per byte.
const FLAG_MATCHES: u8 = 1 << 1;

/// Per-state match metadata, 8 bytes per state.
#[derive(Clone, Copy)]
#[derive(Debug)]
pub(crate) struct StateMeta {
    /// Nearest proper suffix state that is final, or [`NO_OUTPUT`].
    pub output: u16,
    /// Pattern stamped on this state when final.
    pub pattern: u16,
    /// Length of the literal recognised at this state.
    pub depth: u16,
    flags: u8,
}

impl StateMeta {
    pub(crate) fn new(output: u16, pattern: u16, depth: u16, is_final: bool) -> StateMeta {
        let mut flags = 0;
        if is_final {
            flags |= FLAG_FINAL | FLAG_MATCHES;
        }
        if output != NO_OUTPUT {
            flags |= FLAG_MATCHES;
        }
        StateMeta {
            output,
            pattern,
            depth,
            flags,
        }
    }

    #[inline(always)]
    pub(crate) fn is_final(&self) -> bool {
        self.flags & FLAG_FINAL != 0
    }

    #[inline(always)]
    pub(crate) fn has_matches(&self) -> bool {
        self.flags & FLAG_MATCHES != 0
    }
}

/// Storage layout of an automaton's transition function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// One `state_count x 256` table.
    Flat,
    /// Flat root row, `default_next` + bitmap + overrides elsewhere.
    RowCompressed,
}

/// The lookup contract shared by both layouts. Scan loops are generic over
/// this trait and monomorphise per layout, so there is no per-byte dispatch.
pub(crate) trait Transitions {
    fn next_state(&self, state: StateId, byte: u8) -> StateId;
    /// Address worth prefetching before the next byte lands in `state`.
    fn row_hint(&self, state: StateId) -> *const u8;
}

#[derive(Debug)]
pub(crate) struct FlatTable {
    next: Box<[StateId]>,
}

impl FlatTable {
    /// `rows[s]` must be the completed (total) transition row of state `s`.
    pub(crate) fn from_rows(rows: &[Box<[StateId; 256]>]) -> FlatTable {
        let mut next = Vec::with_capacity(rows.len() * 256);
        for row in rows {
            next.extend_from_slice(&row[..]);
        }
        FlatTable {
            next: next.into_boxed_slice(),
        }
    }
}

impl Transitions for FlatTable {
    #[inline(always)]
    fn next_state(&self, state: StateId, byte: u8) -> StateId {
        let idx = (state as usize) << 8 | byte as usize;
        debug_assert!(idx < self.next.len());
        unsafe { *self.next.get_unchecked(idx) }
    }

    #[inline(always)]
    fn row_hint(&self, state: StateId) -> *const u8 {
        unsafe { self.next.as_ptr().add((state as usize) << 8) as *const u8 }
    }
}

#[derive(Clone)]
#[derive(Debug)]
struct CompressedRow {
    bitmap: [u64; 4],
    default_next: StateId,
    overrides_at: u32,
}

#[derive(Debug)]
pub(crate) struct CompressedTable {
    root: Box<[StateId; 256]>,
    rows: Box<[CompressedRow]>,
    overrides: Box<[StateId]>,
}

impl CompressedTable {
    pub(crate) fn from_rows(rows: &[Box<[StateId; 256]>]) -> CompressedTable {
        debug_assert!(!rows.is_empty());
        let root: Box<[StateId; 256]> = Box::new(*rows[0]);

        let mut compressed = Vec::with_capacity(rows.len().saturating_sub(1));
        let mut overrides = Vec::new();
        for row in &rows[1..] {
            // The most frequent target becomes the row default; everything
            // else is an override found by popcount rank.
            let (_, default_next) = row
                .iter()
                .copied()
                .sorted_unstable()
                .dedup_with_count()
                .max_by_key(|&(n, _)| n)
                .expect("transition rows are non-empty");

            let overrides_at = overrides.len() as u32;
            let mut bitmap = [0u64; 4];
            for (byte, &target) in row.iter().enumerate() {
                if target != default_next {
                    bitmap[byte >> 6] |= 1u64 << (byte & 63);
                    overrides.push(target);
                }
            }
            compressed.push(CompressedRow {
                bitmap,
                default_next,
                overrides_at,
            });
        }

        CompressedTable {
            root,
            rows: compressed.into_boxed_slice(),
            overrides: overrides.into_boxed_slice(),
        }
    }
}

impl Transitions for CompressedTable {
    #[inline(always)]
    fn next_state(&self, state: StateId, byte: u8) -> StateId {
        if state == 0 {
            return unsafe { *self.root.get_unchecked(byte as usize) };
        }
        debug_assert!((state as usize) <= self.rows.len());
        let row = unsafe { self.rows.get_unchecked(state as usize - 1) };
        let word = (byte >> 6) as usize;
        let bit = byte as u64 & 63;
        let mask = unsafe { *row.bitmap.get_unchecked(word) };
        if mask & (1 << bit) == 0 {
            return row.default_next;
        }
        // Rank of this bit across the whole bitmap selects the override.
        let mut rank = (mask & ((1u64 << bit) - 1)).count_ones() as usize;
        for w in 0..word {
            rank += row.bitmap[w].count_ones() as usize;
        }
        debug_assert!(row.overrides_at as usize + rank < self.overrides.len() + 1);
        unsafe { *self.overrides.get_unchecked(row.overrides_at as usize + rank) }
    }

    #[inline(always)]
    fn row_hint(&self, state: StateId) -> *const u8 {
        if state == 0 {
            self.root.as_ptr() as *const u8
        } else {
            unsafe { self.rows.as_ptr().add(state as usize - 1) as *const u8 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fill: StateId, overrides: &[(u8, StateId)]) -> Box<[StateId; 256]> {
        let mut r = Box::new([fill; 256]);
        for &(b, t) in overrides {
            r[b as usize] = t;
        }
        r
    }

    #[test]
    fn layouts_agree_on_every_transition() {
        let rows = vec![
            row(0, &[(b'a', 1), (b'b', 2)]),
            row(0, &[(b'a', 1), (b'c', 2), (0xFF, 1)]),
            row(1, &[(b'z', 0)]),
        ];
        let flat = FlatTable::from_rows(&rows);
        let compressed = CompressedTable::from_rows(&rows);
        for state in 0..rows.len() as StateId {
            for byte in 0..=255u8 {
                assert_eq!(
                    flat.next_state(state, byte),
                    compressed.next_state(state, byte),
                    "state {state} byte {byte}",
                );
            }
        }
    }

    #[test]
    fn compressed_default_is_most_frequent_target() {
        // 200 bytes go to state 2, the rest to state 1: default must be 2 so
        // the override list stays short.
        let mut r = Box::new([2 as StateId; 256]);
        for b in 0..56 {
            r[b] = 1;
        }
        let rows = vec![row(0, &[]), r];
        let compressed = CompressedTable::from_rows(&rows);
        assert_eq!(compressed.rows[0].default_next, 2);
        assert_eq!(compressed.overrides.len(), 56);
    }

    #[test]
    fn meta_flags() {
        assert!(StateMeta::new(NO_OUTPUT, 0, 3, true).is_final());
        assert!(StateMeta::new(NO_OUTPUT, 0, 3, true).has_matches());
        assert!(!StateMeta::new(NO_OUTPUT, 0, 0, false).has_matches());
        let chained = StateMeta::new(7, 0, 0, false);
        assert!(!chained.is_final());
        assert!(chained.has_matches());
    }
}
