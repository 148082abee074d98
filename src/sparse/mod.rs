//! Sparse linear algebra kernel for the simplex engine.

pub mod factor;
pub mod vector;

pub use factor::{Factor, FactorError};
pub use vector::SparseVector;

use crate::{E, I};

/// Compressed-column sparse matrix with an on-demand row-wise view.
///
/// The column-wise arrays are authoritative; the row-wise view is rebuilt
/// lazily after structural changes and is what PRICE iterates when the BTRAN
/// result is sparse.
#[derive(Debug, Clone, Default)]
pub struct SparseMatrix {
    pub num_row: I,
    pub num_col: I,
    pub start: Vec<I>,
    pub index: Vec<I>,
    pub value: Vec<E>,

    ar_start: Vec<I>,
    ar_index: Vec<I>,
    ar_value: Vec<E>,
}

impl SparseMatrix {
    /// Builds from CSC arrays, immediately deriving the row-wise view.
    pub fn from_csc(num_row: I, num_col: I, start: Vec<I>, index: Vec<I>, value: Vec<E>) -> Self {
        let mut matrix = Self {
            num_row,
            num_col,
            start,
            index,
            value,
            ar_start: Vec::new(),
            ar_index: Vec::new(),
            ar_value: Vec::new(),
        };
        matrix.build_row_wise();
        matrix
    }

    pub fn num_nz(&self) -> I {
        *self.start.last().unwrap_or(&0)
    }

    /// (index, value) pairs of column `col`.
    pub fn col(&self, col: I) -> impl Iterator<Item = (I, E)> + '_ {
        (self.start[col]..self.start[col + 1]).map(move |k| (self.index[k], self.value[k]))
    }

    /// (index, value) pairs of row `row` from the row-wise view.
    pub fn row(&self, row: I) -> impl Iterator<Item = (I, E)> + '_ {
        (self.ar_start[row]..self.ar_start[row + 1])
            .map(move |k| (self.ar_index[k], self.ar_value[k]))
    }

    /// Dot product of column `col` with a dense vector.
    pub fn col_dot(&self, col: I, dense: &[E]) -> E {
        self.col(col).map(|(i, v)| v * dense[i]).sum()
    }

    /// Transposes the column-wise arrays into the row-wise view by counting
    /// sort.
    fn build_row_wise(&mut self) {
        let num_nz = self.num_nz();
        let mut counts = vec![0usize; self.num_row + 1];
        for &row in &self.index[..num_nz] {
            counts[row + 1] += 1;
        }
        for i in 0..self.num_row {
            counts[i + 1] += counts[i];
        }
        self.ar_start = counts.clone();
        self.ar_index = vec![0; num_nz];
        self.ar_value = vec![0.0; num_nz];
        let mut fill = counts;
        for col in 0..self.num_col {
            for k in self.start[col]..self.start[col + 1] {
                let row = self.index[k];
                let pos = fill[row];
                fill[row] += 1;
                self.ar_index[pos] = col;
                self.ar_value[pos] = self.value[k];
            }
        }
    }

    /// Partitions the columns into at most `num_slices` contiguous ranges of
    /// near-equal nonzero count. Used by the slice-parallel PRICE/CHUZC.
    pub fn slice_columns(&self, num_slices: I) -> Vec<std::ops::Range<I>> {
        let num_slices = num_slices.max(1).min(self.num_col.max(1));
        let num_nz = self.num_nz().max(1);
        let per_slice = num_nz.div_ceil(num_slices);

        let mut slices = Vec::with_capacity(num_slices);
        let mut slice_start = 0;
        let mut slice_nz = 0;
        for col in 0..self.num_col {
            slice_nz += self.start[col + 1] - self.start[col];
            let last = col + 1 == self.num_col;
            if (slice_nz >= per_slice && slices.len() + 1 < num_slices) || last {
                slices.push(slice_start..col + 1);
                slice_start = col + 1;
                slice_nz = 0;
            }
        }
        if slices.is_empty() {
            slices.push(0..self.num_col);
        }
        slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SparseMatrix {
        // 3x4:
        //  1 . 2 .
        //  . 3 . 4
        //  5 . . 6
        SparseMatrix::from_csc(
            3,
            4,
            vec![0, 2, 3, 4, 6],
            vec![0, 2, 1, 0, 1, 2],
            vec![1.0, 5.0, 3.0, 2.0, 4.0, 6.0],
        )
    }

    #[test]
    fn row_view_matches_columns() {
        let m = fixture();
        let row1: Vec<(I, E)> = m.row(1).collect();
        assert_eq!(row1, vec![(1, 3.0), (3, 4.0)]);
        let row2: Vec<(I, E)> = m.row(2).collect();
        assert_eq!(row2, vec![(0, 5.0), (3, 6.0)]);
    }

    #[test]
    fn column_dot_product() {
        let m = fixture();
        assert_eq!(m.col_dot(0, &[1.0, 1.0, 1.0]), 6.0);
        assert_eq!(m.col_dot(3, &[0.0, 2.0, -1.0]), 2.0);
    }

    #[test]
    fn slices_cover_all_columns() {
        let m = fixture();
        for slices in [m.slice_columns(1), m.slice_columns(2), m.slice_columns(8)] {
            let mut covered = 0;
            for slice in &slices {
                assert_eq!(slice.start, covered);
                covered = slice.end;
            }
            assert_eq!(covered, m.num_col);
        }
    }
}
