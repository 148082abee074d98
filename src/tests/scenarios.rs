//! End-to-end facade scenarios: validation outcomes, anomalous models, and
//! coefficient editing.

use rstest::rstest;

use crate::model::{Model, ModelError};
use crate::{
    E, Hessian, HessianFormat, I, INFTY, ModelStatus, Optimizer, Options, Status,
};

fn base_model(num_col: I, num_row: I) -> Model {
    Model {
        num_col,
        num_row,
        col_cost: vec![1.0; num_col],
        col_lower: vec![0.0; num_col],
        col_upper: vec![INFTY; num_col],
        row_lower: vec![-INFTY; num_row],
        row_upper: vec![10.0; num_row],
        a_start: vec![0; num_col + 1],
        ..Model::new()
    }
}

/// Square Hessian passed through the facade comes back triangularized.
#[test]
fn facade_triangularizes_a_square_hessian() {
    let mut optimizer = Optimizer::new();
    let mut model = base_model(5, 1);
    model.col_upper = vec![10.0; 5];
    assert_eq!(optimizer.pass_model(model), Status::Ok);

    let status = optimizer.pass_hessian(
        5,
        HessianFormat::Square,
        vec![0, 4, 7, 9, 12, 15],
        vec![0, 1, 3, 4, 0, 1, 4, 2, 3, 0, 2, 3, 0, 1, 4],
        vec![
            5.0, 1.0, -1.0, 2.0, 1.0, 4.0, 1.0, 3.0, -1.0, -1.0, -1.0, 4.0, 2.0, 1.0, 5.0,
        ],
    );
    assert_eq!(status, Status::Ok);

    let expected = Hessian {
        dim: 5,
        format: HessianFormat::Triangular,
        q_start: vec![0, 4, 6, 8, 9, 10],
        q_index: vec![0, 1, 3, 4, 1, 4, 2, 3, 3, 4],
        q_value: vec![5.0, 1.0, -1.0, 2.0, 4.0, 1.0, 3.0, -1.0, 4.0, 5.0],
    };
    assert_eq!(optimizer.model().hessian.as_ref(), Some(&expected));
}

/// Bound validation outcomes when adding a single column.
#[rstest]
#[case::inconsistent_finite(1.0, 0.0, -1.0, Status::Warning)]
#[case::inconsistent_due_to_lower(1.0, 1.0, 0.0, Status::Warning)]
#[case::infinite_lower(1.0, INFTY, 0.0, Status::Error)]
#[case::negative_infinite_upper(1.0, 0.0, -INFTY, Status::Error)]
#[case::infinite_cost(INFTY, 0.0, 1.0, Status::Error)]
#[case::legitimate_fixed(1.0, 0.0, 0.0, Status::Ok)]
fn adding_one_column(#[case] cost: E, #[case] lower: E, #[case] upper: E, #[case] expect: Status) {
    let mut optimizer = Optimizer::new();
    assert_eq!(optimizer.pass_model(base_model(2, 2)), Status::Ok);
    let status = optimizer.add_cols(&[cost], &[lower], &[upper], &[0, 0], &[], &[]);
    assert_eq!(status, expect);
    let expect_cols = if expect == Status::Error { 2 } else { 3 };
    assert_eq!(optimizer.num_col(), expect_cols);
}

/// A highly anomalous LP: inconsistent bound pairs and infinite costs.
/// `run` answers cleanly: `Ok` with model status `Infeasible`.
#[test]
fn anomalous_lp_is_infeasible_not_an_error() {
    let mut options = Options::default();
    options.allow_infinite_costs = true;
    let mut optimizer = Optimizer::with_options(options);

    let mut model = base_model(6, 2);
    model.a_start = vec![0; 7];
    // Two columns with inconsistent (finite) bounds.
    model.col_lower[1] = 2.0;
    model.col_upper[1] = 1.0;
    model.col_lower[2] = 5.0;
    model.col_upper[2] = -5.0;
    // Two columns with infinite costs.
    model.col_cost[3] = INFTY;
    model.col_cost[4] = -INFTY;

    assert_eq!(optimizer.pass_model(model), Status::Warning);
    assert_eq!(optimizer.run(), Status::Ok);
    assert_eq!(optimizer.model_status(), ModelStatus::Infeasible);
}

/// Coefficient lookup and editing on a 10x8 model.
#[test]
fn coefficient_lookup_and_edit() {
    let mut optimizer = Optimizer::new();
    let mut model = base_model(8, 10);
    // One structural column with a few entries, including (7, 4) = -3.
    model.a_start = vec![0, 0, 0, 0, 0, 3, 3, 3, 3];
    model.a_index = vec![0, 7, 9];
    model.a_value = vec![1.0, -3.0, 2.0];
    assert_eq!(optimizer.pass_model(model), Status::Ok);

    assert_eq!(optimizer.get_coeff(7, 4), Ok(-3.0));
    // Absent entries read as zero.
    assert_eq!(optimizer.get_coeff(4, 7), Ok(0.0));
    assert_eq!(optimizer.get_coeff(10, 0), Err(ModelError::IndexOutOfRange));
    assert_eq!(optimizer.get_coeff(0, 8), Err(ModelError::IndexOutOfRange));

    assert_eq!(optimizer.change_coeff(7, 4, 99.0), Status::Ok);
    assert_eq!(optimizer.get_coeff(7, 4), Ok(99.0));

    // Inserting where no entry existed extends the column.
    assert_eq!(optimizer.change_coeff(3, 2, 7.0), Status::Ok);
    assert_eq!(optimizer.get_coeff(3, 2), Ok(7.0));
    assert_eq!(optimizer.change_coeff(10, 0, 1.0), Status::Error);
}

/// The add-then-delete round trip leaves the model identical.
#[test]
fn add_cols_delete_cols_round_trip() {
    let mut optimizer = Optimizer::new();
    let mut model = base_model(3, 2);
    model.a_start = vec![0, 1, 2, 3];
    model.a_index = vec![0, 1, 0];
    model.a_value = vec![1.0, 2.0, 3.0];
    optimizer.pass_model(model);
    let before = optimizer.model().clone();

    optimizer.add_cols(
        &[5.0, 6.0],
        &[0.0, 1.0],
        &[2.0, 3.0],
        &[0, 1, 3],
        &[1, 0, 1],
        &[4.0, 5.0, 6.0],
    );
    optimizer.delete_cols_by_set(&[3, 4]);

    let after = optimizer.model();
    assert_eq!(after.num_col, before.num_col);
    assert_eq!(after.a_start, before.a_start);
    assert_eq!(after.a_index, before.a_index);
    assert_eq!(after.a_value, before.a_value);
    assert_eq!(after.col_cost, before.col_cost);
    assert_eq!(after.col_lower, before.col_lower);
    assert_eq!(after.col_upper, before.col_upper);
}

/// A quadratic model routed through the facade reaches the interior-point
/// path and solves.
#[test]
fn facade_routes_qp_to_interior_point() {
    let mut optimizer = Optimizer::new();
    let mut model = Model {
        num_col: 2,
        num_row: 1,
        col_cost: vec![-2.0, 0.0],
        col_lower: vec![0.0, 0.0],
        col_upper: vec![10.0, 10.0],
        row_lower: vec![1.0],
        row_upper: vec![1.0],
        a_start: vec![0, 1, 2],
        a_index: vec![0, 0],
        a_value: vec![1.0, 1.0],
        ..Model::new()
    };
    model.hessian = Some(Hessian {
        dim: 2,
        format: HessianFormat::Triangular,
        q_start: vec![0, 1, 2],
        q_index: vec![0, 1],
        q_value: vec![2.0, 2.0],
    });
    assert_eq!(optimizer.pass_model(model), Status::Ok);
    assert_eq!(optimizer.run(), Status::Ok);
    assert_eq!(optimizer.model_status(), ModelStatus::Optimal);
    let solution = optimizer.get_solution().unwrap();
    assert!((solution.col_value[0] - 1.0).abs() < 1e-5);
}

/// Integrality combined with a Hessian is rejected as unsupported.
#[test]
fn miqp_is_not_supported() {
    let mut optimizer = Optimizer::new();
    let mut model = base_model(2, 1);
    model.col_upper = vec![1.0, 1.0];
    model.integrality = vec![crate::Integrality::Integer; 2];
    model.hessian = Some(Hessian {
        dim: 2,
        format: HessianFormat::Triangular,
        q_start: vec![0, 1, 2],
        q_index: vec![0, 1],
        q_value: vec![1.0, 1.0],
    });
    assert_eq!(optimizer.pass_model(model), Status::Ok);
    assert_eq!(optimizer.run(), Status::Error);
    assert!(matches!(
        optimizer.last_error(),
        Some(ModelError::NotSupported(_))
    ));
}

/// A facade-driven MIP solve returns the search optimum.
#[test]
fn facade_runs_the_mip_search() {
    let mut optimizer = Optimizer::new();
    let model = Model {
        num_col: 4,
        num_row: 1,
        sense: crate::ObjSense::Maximize,
        col_cost: vec![8.0, 11.0, 6.0, 4.0],
        col_lower: vec![0.0; 4],
        col_upper: vec![1.0; 4],
        row_lower: vec![-INFTY],
        row_upper: vec![14.0],
        a_start: vec![0, 1, 2, 3, 4],
        a_index: vec![0, 0, 0, 0],
        a_value: vec![5.0, 7.0, 4.0, 3.0],
        integrality: vec![crate::Integrality::Integer; 4],
        ..Model::new()
    };
    assert_eq!(optimizer.pass_model(model), Status::Ok);
    assert_eq!(optimizer.run(), Status::Ok);
    assert_eq!(optimizer.model_status(), ModelStatus::Optimal);
    let solution = optimizer.get_solution().unwrap();
    assert!((solution.objective - 21.0).abs() < 1e-6);
    assert_eq!(solution.col_value, vec![0.0, 1.0, 1.0, 1.0]);
}
