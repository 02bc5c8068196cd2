// src/amr/rect.rs

/// Integer cell index (i, j) on one level.
pub type IntVect = [usize; 2];

/// Integer rectangle in (i,j) index space, using half-open intervals:
/// [i0, i0+nx) × [j0, j0+ny)
///
/// Rects are always expressed in the index space of the level they live on;
/// `refine`/`coarsen` move them between adjacent levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rect2i {
    pub i0: usize,
    pub j0: usize,
    pub nx: usize,
    pub ny: usize,
}

impl Rect2i {
    #[inline]
    pub fn new(i0: usize, j0: usize, nx: usize, ny: usize) -> Self {
        Self { i0, j0, nx, ny }
    }

    #[inline]
    pub fn i1(self) -> usize {
        self.i0 + self.nx
    }

    #[inline]
    pub fn j1(self) -> usize {
        self.j0 + self.ny
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.nx == 0 || self.ny == 0
    }

    #[inline]
    pub fn n_cells(self) -> usize {
        self.nx * self.ny
    }

    #[inline]
    pub fn contains(self, iv: IntVect) -> bool {
        iv[0] >= self.i0 && iv[0] < self.i1() && iv[1] >= self.j0 && iv[1] < self.j1()
    }

    /// Returns true if `other` lies entirely inside this rect.
    #[inline]
    pub fn contains_rect(self, other: Rect2i) -> bool {
        other.i0 >= self.i0
            && other.j0 >= self.j0
            && other.i1() <= self.i1()
            && other.j1() <= self.j1()
    }

    /// Intersection of two rectangles.
    pub fn intersect(self, other: Rect2i) -> Option<Rect2i> {
        let i0 = self.i0.max(other.i0);
        let j0 = self.j0.max(other.j0);
        let i1 = self.i1().min(other.i1());
        let j1 = self.j1().min(other.j1());
        if i1 <= i0 || j1 <= j0 {
            None
        } else {
            Some(Rect2i::new(i0, j0, i1 - i0, j1 - j0))
        }
    }

    /// The same region on a level `ratio` times finer.
    pub fn refine(self, ratio: usize) -> Rect2i {
        Rect2i::new(self.i0 * ratio, self.j0 * ratio, self.nx * ratio, self.ny * ratio)
    }

    /// Smallest rect on a level `ratio` times coarser covering this one.
    pub fn coarsen(self, ratio: usize) -> Rect2i {
        let i0 = self.i0 / ratio;
        let j0 = self.j0 / ratio;
        let i1 = self.i1().div_ceil(ratio);
        let j1 = self.j1().div_ceil(ratio);
        Rect2i::new(i0, j0, i1 - i0, j1 - j0)
    }

    /// Cells in row-major order (i fastest), the order patch data is stored in.
    pub fn cells(self) -> impl Iterator<Item = IntVect> {
        (self.j0..self.j1()).flat_map(move |j| (self.i0..self.i1()).map(move |i| [i, j]))
    }
}

/// Index of the coarse cell a fine cell lies in.
#[inline]
pub fn coarsen_iv(iv: IntVect, ratio: usize) -> IntVect {
    [iv[0] / ratio, iv[1] / ratio]
}

/// One step from `iv` along axis `dir` (`side` is -1 or +1), staying inside `domain`.
#[inline]
pub fn shift_iv(iv: IntVect, dir: usize, side: isize, domain: Rect2i) -> Option<IntVect> {
    let mut out = iv;
    out[dir] = iv[dir].checked_add_signed(side)?;
    if domain.contains(out) {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refine_then_coarsen_is_identity() {
        let r = Rect2i::new(2, 3, 4, 1);
        assert_eq!(r.refine(2).coarsen(2), r);
        assert_eq!(r.refine(4), Rect2i::new(8, 12, 16, 4));
    }

    #[test]
    fn coarsen_covers_unaligned_rects() {
        let r = Rect2i::new(3, 0, 2, 2);
        assert_eq!(r.coarsen(2), Rect2i::new(1, 0, 2, 1));
    }

    #[test]
    fn cells_iterate_row_major() {
        let cells: Vec<_> = Rect2i::new(1, 1, 2, 2).cells().collect();
        assert_eq!(cells, vec![[1, 1], [2, 1], [1, 2], [2, 2]]);
    }

    #[test]
    fn shift_stops_at_domain_edge() {
        let domain = Rect2i::new(0, 0, 3, 3);
        assert_eq!(shift_iv([0, 1], 0, -1, domain), None);
        assert_eq!(shift_iv([2, 1], 0, 1, domain), None);
        assert_eq!(shift_iv([1, 1], 1, 1, domain), Some([1, 2]));
    }
}
