use act_cell::{BinaryStep, binary_step, binary_step_backward};
use ndarray::{Array1, array};
use proptest::prelude::*;

#[test]
fn test_operator_matches_free_function() {
    let op = BinaryStep::new(0.05);
    let x = array![0.1f32, 0.44, 0.46, 0.8, 1.3];
    assert_eq!(op.forward(&x), binary_step(&x, 0.05));
    assert_eq!(op.forward(&x), array![0.0f32, 0.0, 1.0, 1.0, 1.0]);
}

#[test]
fn test_default_operator_has_no_offset() {
    assert_eq!(BinaryStep::default().epsilon, 0.0);
}

proptest! {
    #[test]
    fn prop_binary_step_is_zero_or_one(x in -2.0f32..3.0, eps in 0.0f32..0.5) {
        let y = binary_step(&array![x], eps)[0];
        prop_assert!(y == 0.0 || y == 1.0, "binary_step({}, {}) = {}", x, eps, y);
    }

    #[test]
    fn prop_binary_step_threshold(x in 0.0f32..=1.0, eps in 0.0f32..0.5) {
        let y = binary_step(&array![x], eps)[0];
        prop_assert_eq!(y == 1.0, x >= 0.5 - eps);
    }

    #[test]
    fn prop_binary_step_is_monotonic(a in 0.0f32..=1.0, b in 0.0f32..=1.0, eps in 0.0f32..0.5) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let y = binary_step(&array![lo, hi], eps);
        prop_assert!(y[0] <= y[1]);
    }

    #[test]
    fn prop_straight_through_passes_gradient(values in prop::collection::vec(-10.0f32..10.0, 1..32)) {
        let grads = Array1::from(values);
        prop_assert_eq!(binary_step_backward(&grads), grads);
    }
}
