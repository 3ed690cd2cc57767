//! Row-aligned block partitioning of a raster

/// A run of full-width rows processed as one unit of work.
///
/// `rows` rows starting at `row_offset` are computed; window passes also
/// read a halo so that `read_start..read_start + read_rows` covers every
/// neighbour the block's windows touch (clamped to the raster).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position of this block in raster order
    pub index: usize,
    pub row_offset: usize,
    pub rows: usize,
    pub read_start: usize,
    pub read_rows: usize,
}

impl Block {
    /// Rows of halo read above the first computed row
    pub fn halo_above(&self) -> usize {
        self.row_offset - self.read_start
    }

    /// Raster row of a block-local row
    pub fn to_source_row(&self, local_row: usize) -> usize {
        self.row_offset + local_row
    }
}

/// Iterator over the blocks covering a raster, top to bottom
pub struct BlockIterator {
    total_rows: usize,
    block_rows: usize,
    halo: usize,
    next_row: usize,
    index: usize,
}

impl BlockIterator {
    /// `block_rows` is clamped to at least one row
    pub fn new(total_rows: usize, block_rows: usize, halo: usize) -> Self {
        Self {
            total_rows,
            block_rows: block_rows.max(1),
            halo,
            next_row: 0,
            index: 0,
        }
    }
}

impl Iterator for BlockIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_row >= self.total_rows {
            return None;
        }

        let row_offset = self.next_row;
        let rows = self.block_rows.min(self.total_rows - row_offset);
        let read_start = row_offset.saturating_sub(self.halo);
        let read_end = (row_offset + rows + self.halo).min(self.total_rows);

        let block = Block {
            index: self.index,
            row_offset,
            rows,
            read_start,
            read_rows: read_end - read_start,
        };

        self.next_row += rows;
        self.index += 1;
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total_rows.saturating_sub(self.next_row).div_ceil(self.block_rows);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BlockIterator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_coverage() {
        let blocks: Vec<_> = BlockIterator::new(100, 32, 0).collect();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[3].row_offset, 96);
        assert_eq!(blocks[3].rows, 4);

        let mut covered = vec![false; 100];
        for b in &blocks {
            for r in b.row_offset..b.row_offset + b.rows {
                assert!(!covered[r], "row {r} covered twice");
                covered[r] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn test_halo_is_clamped() {
        let blocks: Vec<_> = BlockIterator::new(10, 4, 2).collect();
        assert_eq!(blocks[0].read_start, 0);
        assert_eq!(blocks[0].read_rows, 6);
        assert_eq!(blocks[0].halo_above(), 0);

        assert_eq!(blocks[1].read_start, 2);
        assert_eq!(blocks[1].read_rows, 8);
        assert_eq!(blocks[1].halo_above(), 2);

        assert_eq!(blocks[2].row_offset, 8);
        assert_eq!(blocks[2].read_start, 6);
        assert_eq!(blocks[2].read_rows, 4);
        assert_eq!(blocks[2].to_source_row(1), 9);
    }

    #[test]
    fn test_empty_raster_and_size_hint() {
        assert_eq!(BlockIterator::new(0, 8, 1).count(), 0);
        assert_eq!(BlockIterator::new(17, 8, 0).len(), 3);
        assert_eq!(BlockIterator::new(5, 0, 0).count(), 5);
    }
}
