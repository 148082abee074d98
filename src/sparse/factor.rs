//! Product-form LU factorization of the simplex basis.
//!
//! `refactor` runs a Gauss–Jordan elimination over the basic columns with
//! partial pivoting, producing one eta matrix per basis position plus a row
//! permutation. `update` appends further etas in position space after each
//! pivot, so `ftran(e_j)` always returns column `j` of the current basis
//! inverse. When the eta file grows past the update limit the factor refuses
//! further updates and the engine must refactorize.

use derive_more::{Display, Error};

use crate::sparse::{SparseMatrix, SparseVector};
use crate::{E, I};

#[derive(Debug, Display, Error, PartialEq, Clone, Copy)]
pub enum FactorError {
    #[display("Basis matrix is singular")]
    Singular,

    #[display("Basis matrix condition estimate above threshold")]
    IllConditioned,

    #[display("Eta update limit reached; refactorization required")]
    UpdateLimit,
}

/// One elementary transform: the identity with column `pivot` replaced.
#[derive(Debug, Clone)]
struct Eta {
    pivot: I,
    pivot_value: E,
    index: Vec<I>,
    value: Vec<E>,
}

impl Eta {
    /// Applies the inverse transform in place.
    fn ftran(&self, work: &mut SparseVector) {
        let pivot_entry = work.array[self.pivot];
        if pivot_entry == 0.0 {
            return;
        }
        let scaled = pivot_entry / self.pivot_value;
        work.array[self.pivot] = scaled;
        for (&i, &v) in self.index.iter().zip(&self.value) {
            work.add(i, -v * scaled);
        }
        work.synthetic_tick += 1.0 + self.index.len() as f64;
    }

    /// Applies the transposed inverse transform in place.
    fn btran(&self, work: &mut SparseVector) {
        let mut dot = 0.0;
        for (&i, &v) in self.index.iter().zip(&self.value) {
            dot += v * work.array[i];
        }
        let pivot_entry = work.array[self.pivot];
        if pivot_entry == 0.0 && dot == 0.0 {
            return;
        }
        let transformed = (pivot_entry - dot) / self.pivot_value;
        if pivot_entry == 0.0 {
            work.set(self.pivot, transformed);
        } else {
            work.set_tracked(self.pivot, transformed);
        }
        work.synthetic_tick += 1.0 + self.index.len() as f64;
    }
}

/// Product-form basis factor.
#[derive(Debug, Clone, Default)]
pub struct Factor {
    num_row: I,
    pivot_tolerance: E,
    condition_limit: E,
    update_limit: I,

    base_etas: Vec<Eta>,
    update_etas: Vec<Eta>,
    /// Basis position -> pivot row of the base elimination.
    pos_to_row: Vec<I>,
    /// Pivot row -> basis position.
    row_to_pos: Vec<I>,
}

impl Factor {
    pub fn new(num_row: I, pivot_tolerance: E, update_limit: I) -> Self {
        Self {
            num_row,
            pivot_tolerance,
            condition_limit: 1e14,
            update_limit,
            base_etas: Vec::new(),
            update_etas: Vec::new(),
            pos_to_row: Vec::new(),
            row_to_pos: Vec::new(),
        }
    }

    /// Number of eta updates since the last refactorization.
    pub fn update_count(&self) -> I {
        self.update_etas.len()
    }

    /// Whether the factor has been built at all.
    pub fn is_built(&self) -> bool {
        !self.pos_to_row.is_empty()
    }

    /// Builds the factor from scratch for the given basic variables.
    ///
    /// Variable `j < num_col` contributes matrix column `j`; variable
    /// `num_col + i` contributes the logical unit column `e_i`.
    pub fn refactor(&mut self, matrix: &SparseMatrix, basic: &[I]) -> Result<(), FactorError> {
        debug_assert_eq!(basic.len(), self.num_row);
        self.base_etas.clear();
        self.update_etas.clear();
        self.pos_to_row = vec![0; self.num_row];
        self.row_to_pos = vec![0; self.num_row];

        let mut assigned = vec![false; self.num_row];
        let mut work = SparseVector::new(self.num_row);
        let mut min_pivot = E::INFINITY;
        let mut max_pivot: E = 0.0;

        for (pos, &var) in basic.iter().enumerate() {
            if var < matrix.num_col {
                work.scatter(matrix.col(var));
            } else {
                work.set(var - matrix.num_col, 1.0);
            }
            for eta in &self.base_etas {
                eta.ftran(&mut work);
            }
            work.pack();

            // Partial pivoting over the rows not yet assigned.
            let mut pivot_row = self.num_row;
            let mut pivot_value: E = 0.0;
            work.for_each_nonzero(|i, v| {
                if !assigned[i] && v.abs() > pivot_value.abs() {
                    pivot_row = i;
                    pivot_value = v;
                }
            });
            if pivot_row == self.num_row || pivot_value.abs() <= self.pivot_tolerance {
                self.pos_to_row.clear();
                self.row_to_pos.clear();
                return Err(FactorError::Singular);
            }
            min_pivot = min_pivot.min(pivot_value.abs());
            max_pivot = max_pivot.max(pivot_value.abs());

            let mut index = Vec::new();
            let mut value = Vec::new();
            work.for_each_nonzero(|i, v| {
                if i != pivot_row {
                    index.push(i);
                    value.push(v);
                }
            });
            self.base_etas.push(Eta {
                pivot: pivot_row,
                pivot_value,
                index,
                value,
            });
            assigned[pivot_row] = true;
            self.pos_to_row[pos] = pivot_row;
            self.row_to_pos[pivot_row] = pos;
            work.clear();
        }

        if max_pivot / min_pivot > self.condition_limit {
            self.pos_to_row.clear();
            self.row_to_pos.clear();
            return Err(FactorError::IllConditioned);
        }
        Ok(())
    }

    /// Solves `B x = work` in place. On exit `work[p]` is the value of the
    /// variable basic in position `p`.
    pub fn ftran(&self, work: &mut SparseVector) {
        for eta in &self.base_etas {
            eta.ftran(work);
        }
        self.permute(work, &self.row_to_pos);
        for eta in &self.update_etas {
            eta.ftran(work);
        }
    }

    /// Solves `B^T x = work` in place.
    pub fn btran(&self, work: &mut SparseVector) {
        for eta in self.update_etas.iter().rev() {
            eta.btran(work);
        }
        self.permute(work, &self.pos_to_row);
        for eta in self.base_etas.iter().rev() {
            eta.btran(work);
        }
    }

    /// Appends a product-form eta for the pivot of `column` (the FTRANned
    /// entering column, position space) against the leaving position.
    pub fn update(&mut self, column: &SparseVector, leaving_pos: I) -> Result<(), FactorError> {
        if self.update_etas.len() >= self.update_limit {
            return Err(FactorError::UpdateLimit);
        }
        let pivot_value = column.array[leaving_pos];
        if pivot_value.abs() <= self.pivot_tolerance {
            return Err(FactorError::Singular);
        }
        let mut index = Vec::new();
        let mut value = Vec::new();
        column.for_each_nonzero(|i, v| {
            if i != leaving_pos {
                index.push(i);
                value.push(v);
            }
        });
        self.update_etas.push(Eta {
            pivot: leaving_pos,
            pivot_value,
            index,
            value,
        });
        Ok(())
    }

    /// Applies only the update etas appended at or after `from`, completing
    /// a batched FTRAN taken against an earlier snapshot of the eta file.
    pub(crate) fn ftran_updates_from(&self, work: &mut SparseVector, from: I) {
        for eta in &self.update_etas[from..] {
            eta.ftran(work);
        }
    }

    /// Remaps `work[map[i]] = work_old[i]`.
    fn permute(&self, work: &mut SparseVector, map: &[I]) {
        let mut entries: Vec<(I, E)> = Vec::with_capacity(work.count());
        work.for_each_nonzero(|i, v| entries.push((map[i], v)));
        let tick = work.synthetic_tick;
        work.clear();
        for (i, v) in entries {
            work.set(i, v);
        }
        work.synthetic_tick = tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_3x3() -> SparseMatrix {
        // Columns of a well-conditioned 3x3 matrix:
        //  2 1 0
        //  1 3 1
        //  0 1 4
        SparseMatrix::from_csc(
            3,
            3,
            vec![0, 2, 5, 7],
            vec![0, 1, 0, 1, 2, 1, 2],
            vec![2.0, 1.0, 1.0, 3.0, 1.0, 1.0, 4.0],
        )
    }

    fn unit(size: I, i: I) -> SparseVector {
        let mut v = SparseVector::new(size);
        v.set(i, 1.0);
        v
    }

    fn multiply_basis(matrix: &SparseMatrix, basic: &[I], x: &[E]) -> Vec<E> {
        let mut out = vec![0.0; matrix.num_row];
        for (pos, &var) in basic.iter().enumerate() {
            if var < matrix.num_col {
                for (i, v) in matrix.col(var) {
                    out[i] += v * x[pos];
                }
            } else {
                out[var - matrix.num_col] += x[pos];
            }
        }
        out
    }

    #[test]
    fn logical_basis_is_identity() {
        let matrix = matrix_3x3();
        let mut factor = Factor::new(3, 1e-11, 50);
        factor.refactor(&matrix, &[3, 4, 5]).unwrap();
        let mut v = SparseVector::new(3);
        v.scatter([(0, 1.5), (2, -2.0)].into_iter());
        factor.ftran(&mut v);
        assert_eq!(v.array, vec![1.5, 0.0, -2.0]);
    }

    #[test]
    fn ftran_inverts_structural_basis() {
        let matrix = matrix_3x3();
        let basic = [0, 1, 2];
        let mut factor = Factor::new(3, 1e-11, 50);
        factor.refactor(&matrix, &basic).unwrap();

        for j in 0..3 {
            let mut v = unit(3, j);
            factor.ftran(&mut v);
            let product = multiply_basis(&matrix, &basic, &v.array);
            for i in 0..3 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((product[i] - expect).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn btran_inverts_transpose() {
        let matrix = matrix_3x3();
        let basic = [2, 5, 0];
        let mut factor = Factor::new(3, 1e-11, 50);
        factor.refactor(&matrix, &basic).unwrap();

        for p in 0..3 {
            let mut v = unit(3, p);
            factor.btran(&mut v);
            // B^T y = e_p means y . (column of basic[q]) = delta_pq.
            for (q, &var) in basic.iter().enumerate() {
                let dot = if var < matrix.num_col {
                    matrix.col_dot(var, &v.array)
                } else {
                    v.array[var - matrix.num_col]
                };
                let expect = if q == p { 1.0 } else { 0.0 };
                assert!((dot - expect).abs() < 1e-10, "p={p} q={q} dot={dot}");
            }
        }
    }

    #[test]
    fn update_agrees_with_refactorization() {
        let matrix = matrix_3x3();
        let mut basic = vec![3, 1, 5];
        let mut factor = Factor::new(3, 1e-11, 50);
        factor.refactor(&matrix, &basic).unwrap();

        // Bring column 2 in at position 0.
        let mut entering = SparseVector::new(3);
        entering.scatter(matrix.col(2));
        factor.ftran(&mut entering);
        factor.update(&entering, 0).unwrap();
        basic[0] = 2;

        let mut fresh = Factor::new(3, 1e-11, 50);
        fresh.refactor(&matrix, &basic).unwrap();

        for j in 0..3 {
            let mut updated = unit(3, j);
            let mut reference = unit(3, j);
            factor.ftran(&mut updated);
            fresh.ftran(&mut reference);
            for i in 0..3 {
                assert!((updated.array[i] - reference.array[i]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn repeated_column_is_singular() {
        let matrix = matrix_3x3();
        let mut factor = Factor::new(3, 1e-11, 50);
        assert_eq!(
            factor.refactor(&matrix, &[0, 0, 1]),
            Err(FactorError::Singular)
        );
        assert!(!factor.is_built());
    }

    #[test]
    fn update_limit_forces_refusal() {
        let matrix = matrix_3x3();
        let mut factor = Factor::new(3, 1e-11, 0);
        factor.refactor(&matrix, &[3, 4, 5]).unwrap();
        let mut entering = SparseVector::new(3);
        entering.scatter(matrix.col(0));
        factor.ftran(&mut entering);
        assert_eq!(factor.update(&entering, 0), Err(FactorError::UpdateLimit));
    }
}
