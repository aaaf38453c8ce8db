use crate::data::ChunkRange;

/// Inclusive fragments covering `[start, size)`, each at most `fragment` bytes.
///
/// # Examples
///
/// ```
/// use onedrive::core::chunk_ranges;
///
/// let ranges: Vec<_> = chunk_ranges(0, 10, 4).map(|r| (r.from, r.to)).collect();
/// assert_eq!(ranges, vec![(0, 3), (4, 7), (8, 9)]);
/// ```
pub fn chunk_ranges(start: u64, size: u64, fragment: u64) -> ChunkRanges {
    ChunkRanges {
        next: start,
        size,
        fragment,
    }
}

#[derive(Debug, Clone)]
pub struct ChunkRanges {
    next: u64,
    size: u64,
    fragment: u64,
}

impl Iterator for ChunkRanges {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        if self.fragment == 0 || self.next >= self.size {
            return None;
        }
        let from = self.next;
        let to = from.saturating_add(self.fragment).min(self.size) - 1;
        self.next = to + 1;
        Some(ChunkRange::new(from, to))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.fragment == 0 || self.next >= self.size {
            return (0, Some(0));
        }
        let remaining = (self.size - self.next).div_ceil(self.fragment) as usize;
        (remaining, Some(remaining))
    }
}

/// Start offset of the first entry of `nextExpectedRanges`.
///
/// Entries look like `"26214400-"` or `"0-327679"`.
pub fn parse_next_expected<S: AsRef<str>>(ranges: &[S]) -> Option<u64> {
    let first = ranges.first()?.as_ref();
    let start = first.split('-').next()?.trim();
    start.parse().ok()
}
