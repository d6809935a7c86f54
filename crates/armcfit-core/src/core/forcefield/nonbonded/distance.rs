use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Point3;

pub(crate) const NO_PARTNER: usize = usize::MAX;

/// Distances from each atom of side `a` to its partners on side `b` for one frame.
///
/// Row `i` holds `width` entries; `partners` gives the local `b` index of each entry, or
/// [`NO_PARTNER`] for padding. Excluded and padded entries hold `f64::INFINITY`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DistanceBlock {
    pub rows: usize,
    pub width: usize,
    pub distances: Vec<f64>,
    pub partners: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exclusion {
    /// Only coincident atoms are dropped.
    ZeroDistance,
    /// Atoms of the same fragment are dropped; `a_len` and `b_len` are the per-fragment counts.
    SameFragment { a_len: usize, b_len: usize },
}

impl Exclusion {
    #[inline]
    fn excludes(self, i: usize, j: usize, dist: f64) -> bool {
        match self {
            Exclusion::ZeroDistance => dist == 0.0,
            Exclusion::SameFragment { a_len, b_len } => i / a_len == j / b_len,
        }
    }
}

fn gather(frame: &[Point3<f64>], indices: &[usize]) -> Vec<[f64; 3]> {
    indices
        .iter()
        .map(|&i| [frame[i].x, frame[i].y, frame[i].z])
        .collect()
}

pub(crate) fn dense_block(frame: &[Point3<f64>], a: &[usize], b: &[usize]) -> DistanceBlock {
    let width = b.len();
    let mut distances = Vec::with_capacity(a.len() * width);
    let mut partners = Vec::with_capacity(a.len() * width);
    for &ia in a {
        let pa = &frame[ia];
        for (j, &ib) in b.iter().enumerate() {
            distances.push(nalgebra::distance(pa, &frame[ib]));
            partners.push(j);
        }
    }
    DistanceBlock {
        rows: a.len(),
        width,
        distances,
        partners,
    }
}

/// The `max_neighbors` nearest `b` atoms within `cutoff` of every `a` atom.
pub(crate) fn neighbor_block(
    frame: &[Point3<f64>],
    a: &[usize],
    b: &[usize],
    cutoff: f64,
    max_neighbors: usize,
) -> DistanceBlock {
    let width = max_neighbors.min(b.len());
    let mut distances = vec![f64::INFINITY; a.len() * width];
    let mut partners = vec![NO_PARTNER; a.len() * width];
    if width == 0 {
        return DistanceBlock {
            rows: a.len(),
            width,
            distances,
            partners,
        };
    }

    let b_coords = gather(frame, b);
    let kdtree: KdTree<f64, 3> = (&b_coords).into();
    let cutoff_sq = cutoff * cutoff;

    for (row, query) in gather(frame, a).iter().enumerate() {
        let found = kdtree.nearest_n_within::<SquaredEuclidean>(query, cutoff_sq, width, true);
        for (col, neighbour) in found.into_iter().take(width).enumerate() {
            distances[row * width + col] = neighbour.distance.sqrt();
            partners[row * width + col] = neighbour.item as usize;
        }
    }

    DistanceBlock {
        rows: a.len(),
        width,
        distances,
        partners,
    }
}

impl DistanceBlock {
    pub fn apply_exclusion(&mut self, rule: Exclusion) {
        for row in 0..self.rows {
            for col in 0..self.width {
                let k = row * self.width + col;
                let j = self.partners[k];
                if j != NO_PARTNER && rule.excludes(row, j, self.distances[k]) {
                    self.distances[k] = f64::INFINITY;
                }
            }
        }
    }

    #[inline]
    pub fn distances(&self) -> &[f64] {
        &self.distances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, spacing: f64) -> Vec<Point3<f64>> {
        (0..n)
            .map(|i| Point3::new(i as f64 * spacing, 0.0, 0.0))
            .collect()
    }

    #[test]
    fn dense_block_holds_all_pair_distances() {
        let frame = line(3, 1.5);
        let block = dense_block(&frame, &[0], &[1, 2]);
        assert_eq!(block.rows, 1);
        assert_eq!(block.width, 2);
        assert_eq!(block.distances, vec![1.5, 3.0]);
        assert_eq!(block.partners, vec![0, 1]);
    }

    #[test]
    fn neighbor_block_limits_by_cutoff_and_count() {
        let frame = line(5, 1.0);
        let block = neighbor_block(&frame, &[0], &[1, 2, 3, 4], 2.5, 3);
        assert_eq!(block.width, 3);
        assert!((block.distances[0] - 1.0).abs() < 1e-12);
        assert!((block.distances[1] - 2.0).abs() < 1e-12);
        assert_eq!(block.distances[2], f64::INFINITY);
        assert_eq!(block.partners[0], 0);
        assert_eq!(block.partners[1], 1);
        assert_eq!(block.partners[2], NO_PARTNER);
    }

    #[test]
    fn zero_distance_exclusion_drops_coincident_atoms_only() {
        let frame = line(2, 1.0);
        let mut block = dense_block(&frame, &[0, 1], &[0, 1]);
        block.apply_exclusion(Exclusion::ZeroDistance);
        assert_eq!(block.distances, vec![f64::INFINITY, 1.0, 1.0, f64::INFINITY]);
    }

    #[test]
    fn same_fragment_exclusion_uses_fragment_lengths() {
        // Two fragments of two atoms each on both sides.
        let frame = line(4, 1.0);
        let mut block = dense_block(&frame, &[0, 1, 2, 3], &[0, 1, 2, 3]);
        block.apply_exclusion(Exclusion::SameFragment { a_len: 2, b_len: 2 });
        let kept: Vec<bool> = block.distances.iter().map(|d| d.is_finite()).collect();
        #[rustfmt::skip]
        let expected = vec![
            false, false, true, true,
            false, false, true, true,
            true, true, false, false,
            true, true, false, false,
        ];
        assert_eq!(kept, expected);
    }
}
