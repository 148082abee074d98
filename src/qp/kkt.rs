//! Sparse KKT system solver for the interior-point QP path.
//!
//! Wraps faer's simplicial sparse LU with a COLAMD fill-reducing ordering.
//! The KKT matrix changes numerically every interior-point iteration, so the
//! ordering and the numeric factorization are redone per call; one
//! factorization serves both the predictor and the corrector solve.

use derive_more::{Display, Error};
use faer::dyn_stack::{MemBuffer, MemStack};
use faer::perm::Perm;
use faer::prelude::{Reborrow, ReborrowMut};
use faer::sparse::linalg::colamd;
use faer::sparse::linalg::lu::simplicial::{self, SimplicialLu};
use faer::sparse::{SparseColMat, Triplet};
use faer::{Mat, MatMut};

use crate::{E, I};

#[derive(Debug, Display, Error, PartialEq, Clone, Copy)]
pub enum KktError {
    #[display("KKT matrix assembly failed")]
    Assembly,

    #[display("Symbolic analysis of the KKT matrix failed")]
    Symbolic,

    #[display("Numeric factorization of the KKT matrix failed")]
    Factorization,

    #[display("Memory allocation failed")]
    Memory,

    #[display("Solve requested before factorization")]
    Uninitialized,
}

/// LU factorization of one KKT matrix.
pub struct KktSolver {
    lu: Option<SimplicialLu<I, E>>,
    row_perm: Option<Perm<I>>,
    col_perm: Option<Perm<I>>,
    dim: I,
}

impl KktSolver {
    pub fn new() -> Self {
        Self {
            lu: None,
            row_perm: None,
            col_perm: None,
            dim: 0,
        }
    }

    /// Builds the sparse matrix from triplets and factorizes it.
    pub fn factorize(&mut self, dim: I, triplets: &[Triplet<I, I, E>]) -> Result<(), KktError> {
        let mat =
            SparseColMat::try_new_from_triplets(dim, dim, triplets).map_err(|_| KktError::Assembly)?;
        self.dim = dim;
        let nnz = mat.compute_nnz();

        // Fill-reducing column permutation using COLAMD.
        let mut col_perm_fwd = vec![0usize; dim];
        let mut col_perm_inv = vec![0usize; dim];
        {
            let mut mem = MemBuffer::try_new(colamd::order_scratch::<usize>(dim, dim, nnz))
                .map_err(|_| KktError::Memory)?;
            colamd::order(
                &mut col_perm_fwd,
                &mut col_perm_inv,
                mat.symbolic(),
                colamd::Control::default(),
                MemStack::new(&mut mem),
            )
            .map_err(|_| KktError::Symbolic)?;
        }
        let col_perm = unsafe {
            Perm::new_unchecked(
                col_perm_fwd.into_boxed_slice(),
                col_perm_inv.into_boxed_slice(),
            )
        };

        let mut row_perm = vec![0usize; dim];
        let mut row_perm_inv = vec![0usize; dim];
        let mut lu = SimplicialLu::new();
        let mut mem = MemBuffer::try_new(
            simplicial::factorize_simplicial_numeric_lu_scratch::<I, E>(dim, dim),
        )
        .map_err(|_| KktError::Memory)?;
        let mut stack = MemStack::new(&mut mem);

        simplicial::factorize_simplicial_numeric_lu::<I, E>(
            &mut row_perm,
            &mut row_perm_inv,
            &mut lu,
            mat.rb(),
            col_perm.as_ref(),
            &mut stack,
        )
        .map_err(|_| KktError::Factorization)?;

        self.row_perm = Some(unsafe {
            Perm::new_unchecked(row_perm.into_boxed_slice(), row_perm_inv.into_boxed_slice())
        });
        self.col_perm = Some(col_perm);
        self.lu = Some(lu);
        Ok(())
    }

    /// Solves the system in place for the given right-hand side.
    pub fn solve_in_place(&self, rhs: &mut MatMut<'_, E>) -> Result<(), KktError> {
        let lu = self.lu.as_ref().ok_or(KktError::Uninitialized)?;
        let row_perm = self.row_perm.as_ref().ok_or(KktError::Uninitialized)?;
        let col_perm = self.col_perm.as_ref().ok_or(KktError::Uninitialized)?;

        let mut mem = MemBuffer::try_new(faer::perm::permute_rows_in_place_scratch::<I, E>(
            self.dim,
            rhs.ncols(),
        ))
        .map_err(|_| KktError::Memory)?;
        let mut stack = MemStack::new(&mut mem);
        lu.solve_in_place_with_conj(
            row_perm.as_ref(),
            col_perm.as_ref(),
            faer::Conj::No,
            rhs.rb_mut(),
            faer::Par::Seq,
            &mut stack,
        );
        Ok(())
    }

    /// Convenience wrapper: solves for a dense vector.
    pub fn solve(&self, rhs: &[E]) -> Result<Vec<E>, KktError> {
        let mut sol = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
        self.solve_in_place(&mut sol.as_mut())?;
        Ok((0..rhs.len()).map(|i| sol[(i, 0)]).collect())
    }
}
