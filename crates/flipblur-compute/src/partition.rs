//! 2D compute grid partitioning.
//!
//! The image is covered by fixed 16x16 blocks. The grid is the ceiling of
//! the image size over the block size, so the last block row and column can
//! hang over the image edge. Tasks in the overhang must not touch memory.

/// Block edge length in tasks, shared by every backend.
pub const BLOCK_DIM: u32 = 16;

/// Grid/block launch geometry for one image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPartition {
    width: u32,
    height: u32,
    block: (u32, u32),
    grid: (u32, u32),
}

impl GridPartition {
    /// Standard 16x16 partition for a `width x height` image.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_block(width, height, BLOCK_DIM, BLOCK_DIM)
    }

    /// Partition with a custom block size. Block edges are clamped to >= 1.
    pub fn with_block(width: u32, height: u32, block_w: u32, block_h: u32) -> Self {
        let block = (block_w.max(1), block_h.max(1));
        Self {
            width,
            height,
            block,
            grid: (width.div_ceil(block.0), height.div_ceil(block.1)),
        }
    }

    /// Image width covered.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height covered.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Tasks per block, `(x, y)`.
    pub fn block(&self) -> (u32, u32) {
        self.block
    }

    /// Blocks in the grid, `(x, y)`.
    pub fn grid(&self) -> (u32, u32) {
        self.grid
    }

    /// Total launched tasks including the overhang.
    pub fn task_count(&self) -> u64 {
        let (gx, gy) = self.grid;
        let (bx, by) = self.block;
        gx as u64 * gy as u64 * bx as u64 * by as u64
    }

    /// Launched tasks that fall outside the image.
    pub fn overhang_tasks(&self) -> u64 {
        self.task_count() - self.width as u64 * self.height as u64
    }

    /// Global coordinate of a task from its block index and in-block offset.
    #[inline]
    pub fn global_coord(&self, block_idx: (u32, u32), thread_idx: (u32, u32)) -> (u32, u32) {
        (
            block_idx.0 * self.block.0 + thread_idx.0,
            block_idx.1 * self.block.1 + thread_idx.1,
        )
    }

    #[inline]
    pub fn in_bounds(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Every launched task coordinate in block order, overhang included.
    pub fn tasks(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (gx, gy) = self.grid;
        let (bx, by) = self.block;
        (0..gy).flat_map(move |gj| {
            (0..gx).flat_map(move |gi| {
                (0..by).flat_map(move |tj| {
                    (0..bx).map(move |ti| self.global_coord((gi, gj), (ti, tj)))
                })
            })
        })
    }

    /// Launched tasks that map to a pixel.
    pub fn in_bounds_tasks(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.tasks().filter(|&(x, y)| self.in_bounds(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_ceil_div() {
        let p = GridPartition::new(1024, 768);
        assert_eq!(p.block(), (16, 16));
        assert_eq!(p.grid(), (64, 48));
        assert_eq!(p.overhang_tasks(), 0);

        let p = GridPartition::new(17, 1);
        assert_eq!(p.grid(), (2, 1));
        assert_eq!(p.task_count(), 2 * 256);
        assert_eq!(p.overhang_tasks(), 2 * 256 - 17);
    }

    #[test]
    fn test_global_coord() {
        let p = GridPartition::new(40, 40);
        assert_eq!(p.global_coord((0, 0), (0, 0)), (0, 0));
        assert_eq!(p.global_coord((2, 1), (3, 15)), (35, 31));
    }

    #[test]
    fn test_coverage_exactly_once() {
        for &(w, h) in &[(1, 1), (15, 17), (16, 16), (33, 7), (100, 3)] {
            let p = GridPartition::new(w, h);
            let mut hits = vec![0u8; (w * h) as usize];
            for (x, y) in p.in_bounds_tasks() {
                hits[(y * w + x) as usize] += 1;
            }
            assert!(hits.iter().all(|&n| n == 1), "{w}x{h}");
            assert_eq!(p.tasks().count() as u64, p.task_count());
        }
    }

    #[test]
    fn test_custom_block_clamped() {
        let p = GridPartition::with_block(10, 10, 0, 4);
        assert_eq!(p.block(), (1, 4));
        assert_eq!(p.grid(), (10, 3));
    }
}
