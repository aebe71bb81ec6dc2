use serde::Serialize;

/// Macroblock edge in pixels.
pub const MACROBLOCK_SIZE: u32 = 16;

/// Bytes per motion-vector record in encoder side information.
pub const VECTOR_RECORD_SIZE: usize = 4;

/// Maximum per-macroblock motion magnitude of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct MotionScore(pub u8);

impl MotionScore {
    pub fn value(self) -> u8 {
        self.0
    }
}

/// One macroblock's motion vector as the encoder reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionVector {
    pub x: i8,
    pub y: i8,
    /// Sum of absolute differences; not used for scoring.
    pub sad: i16,
}

impl MotionVector {
    pub fn new(x: i8, y: i8) -> Self {
        Self { x, y, sad: 0 }
    }

    /// Decode a `{x: i8, y: i8, sad: i16}` record (native endian).
    pub fn from_record(record: [u8; VECTOR_RECORD_SIZE]) -> Self {
        Self {
            x: record[0] as i8,
            y: record[1] as i8,
            sad: i16::from_ne_bytes([record[2], record[3]]),
        }
    }

    /// `floor(sqrt(x² + y²))`. At most 181, so it always fits a `u8`.
    pub fn magnitude(self) -> u8 {
        let x = i32::from(self.x);
        let y = i32::from(self.y);
        let squared = (x * x + y * y) as u32;
        squared.isqrt() as u8
    }
}

/// Macroblock grid of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroblockGrid {
    pub width: usize,
    pub height: usize,
}

impl MacroblockGrid {
    /// `ceil(width / 16) × ceil(height / 16)`.
    pub fn for_resolution(width: u32, height: u32) -> Self {
        Self {
            width: width.div_ceil(MACROBLOCK_SIZE) as usize,
            height: height.div_ceil(MACROBLOCK_SIZE) as usize,
        }
    }

    pub fn cells(&self) -> usize {
        self.width * self.height
    }

    /// Bytes of side information the encoder emits per frame. Each row
    /// carries one extra column.
    pub fn side_info_len(&self) -> usize {
        (self.width + 1) * self.height * VECTOR_RECORD_SIZE
    }
}

/// Score a dense, row-major grid of vectors.
///
/// Vectors beyond `grid_width * grid_height` are ignored; a short slice is
/// scored over what it holds.
pub fn score_motion(vectors: &[MotionVector], grid_width: usize, grid_height: usize) -> MotionScore {
    let cells = grid_width.saturating_mul(grid_height);
    let max = vectors
        .iter()
        .take(cells)
        .map(|vector| vector.magnitude())
        .max()
        .unwrap_or(0);
    MotionScore(max)
}

/// Score encoder side information laid out as 4-byte records with a row
/// stride of `grid.width + 1`.
pub fn score_side_info(payload: &[u8], grid: MacroblockGrid) -> MotionScore {
    let stride = (grid.width + 1) * VECTOR_RECORD_SIZE;
    let mut max = 0u8;
    for row in payload.chunks(stride).take(grid.height) {
        for record in row
            .chunks_exact(VECTOR_RECORD_SIZE)
            .take(grid.width)
        {
            let vector = MotionVector::from_record([record[0], record[1], record[2], record[3]]);
            max = max.max(vector.magnitude());
        }
    }
    MotionScore(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side_info(grid: MacroblockGrid, cells: &[(usize, usize, i8, i8)]) -> Vec<u8> {
        let mut payload = vec![0u8; grid.side_info_len()];
        for &(col, row, x, y) in cells {
            let offset = (row * (grid.width + 1) + col) * VECTOR_RECORD_SIZE;
            payload[offset] = x as u8;
            payload[offset + 1] = y as u8;
        }
        payload
    }

    #[test]
    fn pythagorean_pairs_score_five() {
        assert_eq!(score_motion(&[MotionVector::new(3, 4)], 1, 1), MotionScore(5));
        assert_eq!(score_motion(&[MotionVector::new(4, 3)], 1, 1), MotionScore(5));
    }

    #[test]
    fn sign_flip_does_not_change_score() {
        for (x, y) in [(3i8, 4i8), (-7, 2), (127, -127), (0, -1), (12, 0)] {
            let base = score_motion(&[MotionVector::new(x, y)], 1, 1);
            for (fx, fy) in [(-x, y), (x, -y), (-x, -y)] {
                assert_eq!(
                    score_motion(&[MotionVector::new(fx, fy)], 1, 1),
                    base,
                    "({x}, {y}) vs ({fx}, {fy})"
                );
            }
        }
    }

    #[test]
    fn extreme_vector_fits_u8() {
        assert_eq!(MotionVector::new(-128, -128).magnitude(), 181);
    }

    #[test]
    fn score_is_grid_maximum() {
        let vectors = vec![
            MotionVector::new(1, 0),
            MotionVector::new(0, 9),
            MotionVector::new(2, 2),
            MotionVector::new(6, 8),
        ];
        assert_eq!(score_motion(&vectors, 2, 2), MotionScore(10));
        assert_eq!(score_motion(&vectors, 1, 2), MotionScore(9));
        assert_eq!(score_motion(&[], 4, 4), MotionScore(0));
    }

    #[test]
    fn grid_rounds_up() {
        let grid = MacroblockGrid::for_resolution(1920, 1080);
        assert_eq!(grid, MacroblockGrid { width: 120, height: 68 });
        assert_eq!(grid.side_info_len(), 121 * 68 * 4);
        assert_eq!(MacroblockGrid::for_resolution(16, 17).cells(), 2);
    }

    #[test]
    fn side_info_ignores_extra_column() {
        let grid = MacroblockGrid::for_resolution(64, 32);
        let payload = side_info(grid, &[(1, 1, -3, 4), (grid.width, 0, 100, 100)]);
        assert_eq!(score_side_info(&payload, grid), MotionScore(5));
    }

    #[test]
    fn truncated_side_info_scores_what_is_present() {
        let grid = MacroblockGrid::for_resolution(64, 64);
        let payload = side_info(grid, &[(0, 0, 0, 7), (2, 3, 50, 0)]);
        let short = &payload[..(grid.width + 1) * VECTOR_RECORD_SIZE];
        assert_eq!(score_side_info(short, grid), MotionScore(7));
    }
}
