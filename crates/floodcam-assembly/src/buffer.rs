use std::collections::BTreeMap;
use std::time::Instant;

use floodcam_core::AssemblyKey;

/// Result of inserting one byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeInsert {
    /// Range added bytes not held before.
    New,
    /// Range was already fully held; its bytes overwrite the old ones (last
    /// write wins).
    Replaced,
}

/// Where the sorted ranges stop being contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contiguity {
    /// `[0, upto)` is fully covered.
    Contiguous,
    /// First hole: coverage ends at `expected`, next data starts at `actual`.
    Gap { expected: u64, actual: u64 },
}

/// Sparse reconstruction state for one in-flight object.
///
/// Received bytes are kept as disjoint runs keyed by start offset; a chunk
/// that overlaps or touches existing runs is folded into them. Each byte
/// position is held at most once, so memory never exceeds the highest chunk
/// end seen.
#[derive(Debug, Clone)]
pub struct AssemblyBuffer {
    key: AssemblyKey,
    first_total_size: u32,
    total_size: u32,
    runs: BTreeMap<u64, Vec<u8>>,
    received_bytes: u64,
    chunks_seen: u64,
    created_at: Instant,
    last_updated_at: Instant,
}

impl AssemblyBuffer {
    pub fn new(key: AssemblyKey, total_size: u32, now: Instant) -> Self {
        Self {
            key,
            first_total_size: total_size,
            total_size,
            runs: BTreeMap::new(),
            received_bytes: 0,
            chunks_seen: 0,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn key(&self) -> &AssemblyKey {
        &self.key
    }

    /// Most recently declared total size; drives completion math.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Total size declared by the first chunk.
    pub fn first_total_size(&self) -> u32 {
        self.first_total_size
    }

    /// Union length of all received ranges.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Bytes actually allocated for chunk data.
    pub fn held_bytes(&self) -> usize {
        self.runs.values().map(Vec::len).sum()
    }

    /// Chunks accepted, duplicates included.
    pub fn chunks_seen(&self) -> u64 {
        self.chunks_seen
    }

    /// Number of disjoint covered runs.
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_updated_at(&self) -> Instant {
        self.last_updated_at
    }

    /// `(offset, len)` of each covered run, in offset order.
    pub fn runs(&self) -> impl Iterator<Item = (u64, usize)> + '_ {
        self.runs.iter().map(|(offset, bytes)| (*offset, bytes.len()))
    }

    /// Records a newly declared total size, returning the previous one when
    /// it differs.
    pub fn declare_total_size(&mut self, total_size: u32) -> Option<u32> {
        if total_size == self.total_size {
            return None;
        }
        let previous = self.total_size;
        self.total_size = total_size;
        Some(previous)
    }

    fn covers(&self, start: u64, end: u64) -> bool {
        self.runs
            .range(..=start)
            .next_back()
            .is_some_and(|(s, bytes)| s + bytes.len() as u64 >= end)
    }

    /// Stores `payload` at `offset`. Bytes already held in that range are
    /// overwritten, and the runs it overlaps or touches merge into one.
    pub fn insert(&mut self, offset: u32, payload: Vec<u8>, now: Instant) -> RangeInsert {
        self.chunks_seen += 1;
        self.last_updated_at = now;

        let start = u64::from(offset);
        let end = start + payload.len() as u64;
        let outcome = if self.covers(start, end) {
            RangeInsert::Replaced
        } else {
            RangeInsert::New
        };
        if payload.is_empty() {
            return outcome;
        }

        // Runs are disjoint and sorted, so their ends are sorted too.
        let touching: Vec<u64> = self
            .runs
            .range(..=end)
            .rev()
            .take_while(|(s, bytes)| *s + bytes.len() as u64 >= start)
            .map(|(s, _)| *s)
            .collect();
        let mut runs: Vec<(u64, Vec<u8>)> = touching
            .into_iter()
            .rev()
            .filter_map(|s| self.runs.remove(&s).map(|bytes| (s, bytes)))
            .collect();

        let merged_start = runs.first().map_or(start, |(s, _)| (*s).min(start));
        let merged_end = runs
            .last()
            .map_or(end, |(s, bytes)| (s + bytes.len() as u64).max(end));
        let mut merged = if runs.first().is_some_and(|(s, _)| *s == merged_start) {
            runs.remove(0).1
        } else {
            Vec::new()
        };
        merged.resize((merged_end - merged_start) as usize, 0);
        for (s, bytes) in runs {
            let at = (s - merged_start) as usize;
            merged[at..at + bytes.len()].copy_from_slice(&bytes);
        }
        let at = (start - merged_start) as usize;
        merged[at..at + payload.len()].copy_from_slice(&payload);
        self.runs.insert(merged_start, merged);

        self.received_bytes = self.held_bytes() as u64;
        outcome
    }

    /// Reports the first hole below `upto`.
    pub fn contiguity(&self, upto: u64) -> Contiguity {
        let covered_to = match self.runs.first_key_value() {
            Some((0, bytes)) => bytes.len() as u64,
            Some((start, _)) => {
                return Contiguity::Gap {
                    expected: 0,
                    actual: (*start).min(upto),
                }
            }
            None => 0,
        };
        if covered_to >= upto {
            return Contiguity::Contiguous;
        }
        let actual = self
            .runs
            .range(covered_to..)
            .next()
            .map_or(upto, |(s, _)| (*s).min(upto));
        Contiguity::Gap {
            expected: covered_to,
            actual,
        }
    }

    /// The first `len` bytes of the object. Callers check
    /// [`contiguity`](Self::contiguity) first; an uncovered tail is left out
    /// rather than zero-filled.
    pub fn assemble(&self, len: u32) -> Vec<u8> {
        match self.runs.first_key_value() {
            Some((0, bytes)) => bytes[..bytes.len().min(len as usize)].to_vec(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use floodcam_core::{AssemblyKey, SessionId, Variant};

    use super::{AssemblyBuffer, Contiguity, RangeInsert};

    fn buffer(total: u32) -> AssemblyBuffer {
        AssemblyBuffer::new(
            AssemblyKey::new(SessionId(7), Variant::Previous),
            total,
            Instant::now(),
        )
    }

    #[test]
    fn duplicate_offset_replaces_without_double_counting() {
        let mut buf = buffer(300);
        let now = Instant::now();
        assert_eq!(buf.insert(0, vec![1; 100], now), RangeInsert::New);
        assert_eq!(buf.insert(0, vec![2; 100], now), RangeInsert::Replaced);
        assert_eq!(buf.received_bytes(), 100);
        assert_eq!(buf.chunks_seen(), 2);
        assert_eq!(buf.assemble(100), vec![2; 100]);
    }

    #[test]
    fn overlapping_ranges_count_union() {
        let mut buf = buffer(300);
        let now = Instant::now();
        buf.insert(0, vec![1; 150], now);
        buf.insert(100, vec![2; 150], now);
        assert_eq!(buf.received_bytes(), 250);

        // Fully contained range adds nothing.
        buf.insert(20, vec![3; 10], now);
        assert_eq!(buf.received_bytes(), 250);
    }

    #[test]
    fn contiguity_reports_first_hole() {
        let mut buf = buffer(300);
        let now = Instant::now();
        buf.insert(0, vec![0; 100], now);
        buf.insert(200, vec![0; 100], now);
        assert_eq!(
            buf.contiguity(300),
            Contiguity::Gap {
                expected: 100,
                actual: 200
            }
        );

        buf.insert(100, vec![0; 100], now);
        assert_eq!(buf.contiguity(300), Contiguity::Contiguous);
    }

    #[test]
    fn contiguity_requires_start_at_zero() {
        let mut buf = buffer(300);
        buf.insert(50, vec![0; 250], Instant::now());
        assert_eq!(
            buf.contiguity(300),
            Contiguity::Gap {
                expected: 0,
                actual: 50
            }
        );
    }

    #[test]
    fn contiguity_ignores_holes_past_limit() {
        let mut buf = buffer(300);
        let now = Instant::now();
        buf.insert(0, vec![0; 200], now);
        buf.insert(250, vec![0; 50], now);
        assert_eq!(buf.contiguity(200), Contiguity::Contiguous);
        assert_eq!(
            buf.contiguity(300),
            Contiguity::Gap {
                expected: 200,
                actual: 250
            }
        );
    }

    #[test]
    fn assemble_orders_by_offset_and_truncates() {
        let mut buf = buffer(6);
        let now = Instant::now();
        buf.insert(4, vec![5, 6], now);
        buf.insert(0, vec![1, 2], now);
        buf.insert(2, vec![3, 4], now);
        assert_eq!(buf.assemble(6), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(buf.assemble(5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn overlapping_bytes_take_the_latest_write() {
        let mut buf = buffer(4);
        let now = Instant::now();
        buf.insert(0, vec![1, 1, 1], now);
        assert_eq!(buf.insert(2, vec![9, 2], now), RangeInsert::New);
        assert_eq!(buf.assemble(4), vec![1, 1, 9, 2]);
        assert_eq!(buf.run_count(), 1);
    }

    #[test]
    fn touching_and_bridging_runs_merge() {
        let mut buf = buffer(10);
        let now = Instant::now();
        buf.insert(0, vec![1, 2], now);
        buf.insert(6, vec![7, 8], now);
        buf.insert(8, vec![9, 10], now);
        assert_eq!(buf.runs().collect::<Vec<_>>(), vec![(0, 2), (6, 4)]);

        buf.insert(2, vec![3, 4, 5, 6], now);
        assert_eq!(buf.runs().collect::<Vec<_>>(), vec![(0, 10)]);
        assert_eq!(buf.assemble(10), (1..=10).collect::<Vec<u8>>());
    }

    #[test]
    fn shifted_retransmissions_hold_each_byte_once() {
        let total = 4000_u32;
        let mut buf = buffer(total);
        let now = Instant::now();
        for offset in 1..total {
            let len = (total - offset) as usize;
            buf.insert(offset, vec![offset as u8; len], now);
            assert!(buf.held_bytes() <= total as usize, "offset {offset}");
        }
        assert_eq!(buf.received_bytes(), u64::from(total) - 1);
        assert_eq!(buf.held_bytes(), total as usize - 1);
        assert_eq!(buf.run_count(), 1);

        assert_eq!(buf.insert(0, vec![0], now), RangeInsert::New);
        assert_eq!(buf.contiguity(u64::from(total)), Contiguity::Contiguous);
        assert_eq!(buf.assemble(total).len(), total as usize);
    }

    #[test]
    fn payload_inside_a_run_is_a_replacement() {
        let mut buf = buffer(300);
        let now = Instant::now();
        buf.insert(0, vec![1; 300], now);
        assert_eq!(buf.insert(100, vec![2; 50], now), RangeInsert::Replaced);
        assert_eq!(buf.held_bytes(), 300);
        assert_eq!(buf.assemble(300)[100..150], [2; 50]);
    }

    #[test]
    fn declare_total_size_tracks_last_value() {
        let mut buf = buffer(300);
        assert_eq!(buf.declare_total_size(300), None);
        assert_eq!(buf.declare_total_size(280), Some(300));
        assert_eq!(buf.total_size(), 280);
        assert_eq!(buf.first_total_size(), 300);
    }

    #[test]
    fn insert_bumps_last_updated() {
        let start = Instant::now();
        let mut buf = AssemblyBuffer::new(
            AssemblyKey::new(SessionId(1), Variant::Current),
            10,
            start,
        );
        let later = start + Duration::from_secs(5);
        buf.insert(0, vec![0; 5], later);
        assert_eq!(buf.created_at(), start);
        assert_eq!(buf.last_updated_at(), later);
    }
}
