mod common;

use act_cell::*;
use approx::assert_abs_diff_eq;
use ndarray::{Array2, array};

use common::*;

#[test]
fn test_gradients_require_a_forward_step() {
    let act = constant_act(1, 1, 0.6);
    let result = act.compute_gradients(&Array2::ones((1, 1)), &CellState::Flat(Array2::zeros((1, 1))), 0.0);
    assert!(matches!(result, Err(ActError::GradientError { .. })));
}

#[test]
fn test_straight_through_output_gradients() {
    let mut act = constant_act(1, 1, 0.6);
    let state = act.zero_state();
    act.step(&increments(&[1.0]), &state, 0).unwrap();

    let grads = act
        .compute_gradients(&array![[1.0f32]], &CellState::Flat(array![[0.0f32]]), 0.0)
        .unwrap();

    assert_eq!(grads.iterations.len(), 2);
    for it in &grads.iterations {
        assert_eq!(it.output, array![[1.0f32]]);
        // Zero halting weights: nothing flows back into the state.
        assert_eq!(it.state, array![[0.0f32]]);
    }

    // The carried result was gated out (last_p = 0 rounds to 0).
    assert_eq!(grads.last_output, array![[0.0f32]]);
    assert_eq!(grads.last_state, array![[0.0f32]]);
}

#[test]
fn test_halting_parameter_gradients() {
    let mut act = constant_act(1, 1, 0.6);
    let state = act.zero_state();
    act.step(&increments(&[1.0]), &state, 0).unwrap();

    // L = acc_output = 1 * bs(prob_1) + 2 * bs(prob_2); with the straight-through
    // rule dL/dp_1 = 1 + 2 and dL/dp_2 = 2, and dp/dz = 0.6 * 0.4.
    let grads = act
        .compute_gradients(&array![[1.0f32]], &CellState::Flat(array![[0.0f32]]), 0.0)
        .unwrap();

    assert_abs_diff_eq!(grads.halting_bias, 5.0 * 0.24, epsilon = 1e-4);
    // Halting inputs were the states 1 and 2.
    assert_abs_diff_eq!(grads.halting_weights[[0, 0]], 1.0 * 0.72 + 2.0 * 0.48, epsilon = 1e-4);
}

#[test]
fn test_ponder_surrogate_gradient_pushes_towards_halting() {
    let mut act = constant_act(1, 1, 0.6);
    let state = act.zero_state();
    act.step(&increments(&[1.0]), &state, 0).unwrap();

    let without = act
        .compute_gradients(&array![[1.0f32]], &CellState::Flat(array![[0.0f32]]), 0.0)
        .unwrap();
    let with = act
        .compute_gradients(&array![[1.0f32]], &CellState::Flat(array![[0.0f32]]), 1.0)
        .unwrap();

    // Each active iteration loses one unit of dL/dprob: dp_1 = 1, dp_2 = 1.
    assert_abs_diff_eq!(with.halting_bias, 2.0 * 0.24, epsilon = 1e-4);
    assert!(with.halting_bias < without.halting_bias);
}

#[test]
fn test_halted_examples_receive_no_gradient_from_late_iterations() {
    let mut act = state_dependent_act(2);
    let state = act.zero_state();
    act.step(&increments(&[0.5, 2.0]), &state, 0).unwrap();

    let grads = act
        .compute_gradients(
            &Array2::ones((2, 1)),
            &CellState::Flat(Array2::ones((2, 1))),
            act.ponder_step_gradient(),
        )
        .unwrap();

    // The second example halted on iteration 2, the loop ran a third time.
    assert_eq!(grads.iterations.len(), 3);
    let last = &grads.iterations[2];
    assert_eq!(last.output[[1, 0]], 0.0);
    assert_eq!(last.state[[1, 0]], 0.0);
    assert!(last.output[[0, 0]] > 0.0);
}

#[test]
fn test_carry_gradient_flows_when_previous_result_is_reused() {
    let mut act = constant_act(1, 1, 0.9);
    let state = act.zero_state();
    let (_, next) = act.step(&increments(&[1.0]), &state, 0).unwrap();
    act.step(&increments(&[1.0]), &next, 1).unwrap();

    let grads = act
        .compute_gradients(&array![[2.0f32]], &CellState::Flat(array![[3.0f32]]), 0.0)
        .unwrap();

    assert_eq!(grads.last_output, array![[2.0f32]]);
    assert_eq!(grads.last_state, array![[3.0f32]]);
    for it in &grads.iterations {
        assert_eq!(it.output, array![[0.0f32]]);
    }
    assert_eq!(grads.halting_bias, 0.0);
}

#[test]
fn test_paired_gradients_split_back_into_halves() {
    let config = ActConfig::new(4, 1).with_state_is_tuple(true);
    let unit = HaltingUnit::from_parameters(array![[0.1f32], [0.2]], bias_for(0.6, 1.0), 1.0).unwrap();
    let mut act = ActCell::with_halting_unit(CountingCell::new(), config, unit).unwrap();
    let state = act.zero_state();
    act.step(&increments(&[1.0]), &state, 0).unwrap();

    let grad_state = CellState::Paired(Array2::ones((1, 2)), Array2::zeros((1, 2)));
    let grads = act.compute_gradients(&Array2::zeros((1, 2)), &grad_state, 0.0).unwrap();

    for it in &grads.iterations {
        match it.state_as_cell_state(true).unwrap() {
            CellState::Paired(c, h) => {
                assert_eq!(c.dim(), (1, 2));
                // The halting unit only reads the memory half.
                assert_eq!(h, Array2::<f32>::zeros((1, 2)));
            }
            CellState::Flat(_) => panic!("expected paired gradient"),
        }
    }
}

#[test]
fn test_apply_gradients_updates_halting_unit() {
    let mut act = constant_act(1, 1, 0.6);
    let state = act.zero_state();
    act.step(&increments(&[1.0]), &state, 0).unwrap();

    let before = act.halting_unit().bias();
    let grads = act
        .compute_gradients(&array![[1.0f32]], &CellState::Flat(array![[0.0f32]]), 0.0)
        .unwrap();
    act.apply_gradients(&grads, 0.01).unwrap();

    // Positive bias gradient: gradient descent lowers the bias.
    assert!(act.halting_unit().bias() < before);
}

#[test]
fn test_gradient_shape_mismatch_rejected() {
    let mut act = constant_act(2, 1, 0.6);
    let state = act.zero_state();
    act.step(&increments(&[1.0, 1.0]), &state, 0).unwrap();

    let result = act.compute_gradients(&Array2::ones((1, 1)), &CellState::Flat(Array2::zeros((2, 1))), 0.0);
    assert!(matches!(result, Err(ActError::ShapeMismatch { .. })));
}
