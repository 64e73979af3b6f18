//! Row-bounded chunk planning.
//!
//! Every chunk repeats the header, so a chunk's size starts at `header_size`.
//! A row joins the current chunk when the result stays `<= target`; otherwise
//! the chunk closes and the row opens the next one. A chunk never closes empty:
//! a row larger than the target on its own still gets a chunk to itself.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Append to the chunk that is currently open (opening the first one if needed).
    Current,
    /// Close the open chunk; the row starts a fresh one.
    NewChunk,
}

#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    target: u64,
    header_size: u64,
    current_size: u64,
    rows_in_current: u64,
}

impl ChunkPlanner {
    pub fn new(target_chunk_bytes: u64, header_size: u64) -> Self {
        Self {
            target: target_chunk_bytes,
            header_size,
            current_size: header_size,
            rows_in_current: 0,
        }
    }

    pub fn place(&mut self, row_size: u64) -> Placement {
        let fits = self.current_size.saturating_add(row_size) <= self.target;
        if fits || self.rows_in_current == 0 {
            self.current_size = self.current_size.saturating_add(row_size);
            self.rows_in_current += 1;
            Placement::Current
        } else {
            self.current_size = self.header_size.saturating_add(row_size);
            self.rows_in_current = 1;
            Placement::NewChunk
        }
    }

    /// Bytes the open chunk will occupy on disk, header included.
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// True when the open chunk exceeds the target (a lone oversized row).
    pub fn over_target(&self) -> bool {
        self.current_size > self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Range;

    /// Plan a whole sequence of row sizes; returns row index ranges.
    fn plan_chunks(target_chunk_bytes: u64, header_size: u64, rows: &[u64]) -> Vec<Range<usize>> {
        let mut planner = ChunkPlanner::new(target_chunk_bytes, header_size);
        let mut out = Vec::new();
        let mut start = 0usize;
        for (i, &sz) in rows.iter().enumerate() {
            if planner.place(sz) == Placement::NewChunk {
                out.push(start..i);
                start = i;
            }
        }
        if !rows.is_empty() {
            out.push(start..rows.len());
        }
        out
    }

    #[test]
    fn one_row_per_chunk_when_target_is_header_plus_row() {
        // "id,val\n" = 7, each "n,x\n" = 4
        assert_eq!(plan_chunks(11, 7, &[4, 4, 4]), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn exact_fit_stays_in_current_chunk() {
        assert_eq!(plan_chunks(15, 7, &[4, 4, 4]), vec![0..2, 2..3]);
        assert_eq!(plan_chunks(14, 7, &[4, 4, 4]), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn oversized_row_gets_its_own_chunk() {
        let plan = plan_chunks(20, 7, &[4, 100, 4, 4]);
        assert_eq!(plan, vec![0..1, 1..2, 2..4]);

        let mut p = ChunkPlanner::new(20, 7);
        assert_eq!(p.place(100), Placement::Current);
        assert!(p.over_target());
        assert_eq!(p.place(4), Placement::NewChunk);
        assert_eq!(p.current_size(), 11);
    }

    #[test]
    fn target_smaller_than_header_still_places_every_row() {
        assert_eq!(plan_chunks(3, 7, &[4, 4]), vec![0..1, 1..2]);
    }

    #[test]
    fn plans_cover_every_row_once_and_in_order() {
        let rows: Vec<u64> = (0..200).map(|i| 1 + (i * 37 % 23)).collect();
        for target in [10u64, 25, 64, 1000] {
            let plan = plan_chunks(target, 9, &rows);
            let mut next = 0;
            for r in &plan {
                assert_eq!(r.start, next);
                assert!(r.end > r.start);
                let size: u64 = 9 + rows[r.clone()].iter().sum::<u64>();
                assert!(size <= target || r.len() == 1);
                next = r.end;
            }
            assert_eq!(next, rows.len());
        }
        assert!(plan_chunks(10, 9, &[]).is_empty());
    }
}
