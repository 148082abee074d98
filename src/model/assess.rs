//! Model validation.
//!
//! `assess_model` establishes the structural invariants the engines rely on:
//! consistent dimensions, monotone column starts, in-range unique row
//! indices, bounds normalized to the infinity sentinel, and matrix
//! magnitudes inside the allowed band. Inconsistent-but-finite bounds are
//! kept (the model is then infeasible) with a warning; illegal bounds and
//! out-of-band coefficients abort with an error.

use crate::model::{Model, ModelError};
use crate::options::Options;
use crate::{E, I, INFTY, Status, is_neg_infinite, is_pos_infinite};

/// Validates and normalizes a pair of bounds.
///
/// Returns the normalized bounds together with `Warning` when the pair is
/// inconsistent (finite `lower > upper`).
pub fn assess_bounds(
    entity: &'static str,
    index: I,
    lower: E,
    upper: E,
) -> Result<(E, E, Status), ModelError> {
    if lower.is_nan() || upper.is_nan() {
        return Err(ModelError::BadBound { entity, index });
    }
    // A lower bound of +inf or an upper bound of -inf cannot be satisfied by
    // any finite value and is rejected rather than coerced.
    if is_pos_infinite(lower) || is_neg_infinite(upper) {
        return Err(ModelError::BadBound { entity, index });
    }

    let lower = if is_neg_infinite(lower) { -INFTY } else { lower };
    let upper = if is_pos_infinite(upper) { INFTY } else { upper };

    let status = if lower > upper {
        Status::Warning
    } else {
        Status::Ok
    };
    Ok((lower, upper, status))
}

/// Validates a single objective coefficient against the infinite-cost policy.
pub fn assess_cost(index: I, cost: E, options: &Options) -> Result<(), ModelError> {
    if cost.is_nan() {
        return Err(ModelError::InfiniteCost(index));
    }
    if !options.allow_infinite_costs && (is_pos_infinite(cost) || is_neg_infinite(cost)) {
        return Err(ModelError::InfiniteCost(index));
    }
    Ok(())
}

/// Validates one column-wise matrix slice against the magnitude band and the
/// structural invariants. Small values are *flagged* for dropping by
/// returning their positions; the caller decides whether to rebuild.
fn assess_matrix(
    num_row: I,
    a_start: &[I],
    a_index: &[I],
    a_value: &[E],
    options: &Options,
) -> Result<Vec<I>, ModelError> {
    let num_col = a_start.len().saturating_sub(1);
    if a_start.first() != Some(&0) {
        return Err(ModelError::DimensionMismatch(
            "matrix starts must begin at zero".to_string(),
        ));
    }
    let num_nz = *a_start.last().unwrap_or(&0);
    if a_index.len() != num_nz || a_value.len() != num_nz {
        return Err(ModelError::DimensionMismatch(format!(
            "matrix has {} starts but {} indices and {} values",
            num_nz,
            a_index.len(),
            a_value.len()
        )));
    }

    let mut small = Vec::new();
    let mut seen = vec![usize::MAX; num_row];
    for col in 0..num_col {
        if a_start[col] > a_start[col + 1] {
            return Err(ModelError::DimensionMismatch(
                "matrix starts must be non-decreasing".to_string(),
            ));
        }
        for k in a_start[col]..a_start[col + 1] {
            let row = a_index[k];
            if row >= num_row {
                return Err(ModelError::IndexOutOfRange);
            }
            if seen[row] == col {
                return Err(ModelError::DuplicateIndex);
            }
            seen[row] = col;

            let magnitude = a_value[k].abs();
            if !magnitude.is_finite() || magnitude > options.large_matrix_value {
                return Err(ModelError::LargeCoefficient);
            }
            if magnitude < options.small_matrix_value {
                small.push(k);
            }
        }
    }
    Ok(small)
}

/// Validates the whole model, normalizing bounds and dropping matrix entries
/// below the small-value threshold.
///
/// Returns `Ok(Status::Warning)` when something was coerced or dropped;
/// errors leave the model untouched.
pub fn assess_model(model: &mut Model, options: &Options) -> Result<Status, ModelError> {
    let num_col = model.num_col;
    let num_row = model.num_row;

    for (name, len, expect) in [
        ("column costs", model.col_cost.len(), num_col),
        ("column lower bounds", model.col_lower.len(), num_col),
        ("column upper bounds", model.col_upper.len(), num_col),
        ("row lower bounds", model.row_lower.len(), num_row),
        ("row upper bounds", model.row_upper.len(), num_row),
        ("matrix starts", model.a_start.len(), num_col + 1),
    ] {
        if len != expect {
            return Err(ModelError::DimensionMismatch(format!(
                "{name} has length {len}, expected {expect}"
            )));
        }
    }
    if !model.integrality.is_empty() && model.integrality.len() != num_col {
        return Err(ModelError::DimensionMismatch(format!(
            "integrality has length {}, expected {num_col}",
            model.integrality.len()
        )));
    }

    // Validate everything before mutating anything.
    for j in 0..num_col {
        assess_cost(j, model.col_cost[j], options)?;
    }
    let mut new_bounds = Vec::with_capacity(num_col + num_row);
    let mut status = Status::Ok;
    for j in 0..num_col {
        let (lower, upper, bound_status) =
            assess_bounds("column", j, model.col_lower[j], model.col_upper[j])?;
        status = status.worst(bound_status);
        new_bounds.push((lower, upper));
    }
    for i in 0..num_row {
        let (lower, upper, bound_status) =
            assess_bounds("row", i, model.row_lower[i], model.row_upper[i])?;
        status = status.worst(bound_status);
        new_bounds.push((lower, upper));
    }

    let small = assess_matrix(
        num_row,
        &model.a_start,
        &model.a_index,
        &model.a_value,
        options,
    )?;

    if let Some(hessian) = &mut model.hessian {
        if hessian.dim != num_col {
            return Err(ModelError::DimensionMismatch(format!(
                "Hessian dimension {} does not match {num_col} columns",
                hessian.dim
            )));
        }
        status = status.worst(super::hessian::assess_hessian(hessian, options, model.sense)?);
    }

    // All checks passed: commit the normalized bounds and drop small entries.
    for j in 0..num_col {
        (model.col_lower[j], model.col_upper[j]) = new_bounds[j];
    }
    for i in 0..num_row {
        (model.row_lower[i], model.row_upper[i]) = new_bounds[num_col + i];
    }

    if !small.is_empty() {
        status = status.worst(Status::Warning);
        drop_entries(model, &small);
    }

    Ok(status)
}

/// Removes the matrix entries at the given ascending positions.
fn drop_entries(model: &mut Model, positions: &[I]) {
    let mut drop_mark = vec![false; model.a_value.len()];
    for &k in positions {
        drop_mark[k] = true;
    }

    let mut new_start = vec![0; model.num_col + 1];
    let mut keep = 0;
    for col in 0..model.num_col {
        for k in model.a_start[col]..model.a_start[col + 1] {
            if !drop_mark[k] {
                model.a_index[keep] = model.a_index[k];
                model.a_value[keep] = model.a_value[k];
                keep += 1;
            }
        }
        new_start[col + 1] = keep;
    }
    model.a_index.truncate(keep);
    model.a_value.truncate(keep);
    model.a_start = new_start;
}
