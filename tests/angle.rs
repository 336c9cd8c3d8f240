use approx::assert_relative_eq;
use nalgebra::Rotation2;
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use soil_height::{angle::AngleError, prelude::*};

/// Flow of a camera moving by `(dx, dy)` pixels, with a ragged border of
/// untracked pixels and small tracking noise.
fn flow(dx: f64, dy: f64) -> (ScalarField, ScalarField) {
    let noise = |row: usize, col: usize| ((row * 7 + col * 3) % 5) as f64 * 0.05 - 0.1;
    let tracked = |row: usize, col: usize| row >= 2 && col >= 3;
    let field = |value: f64| {
        ScalarField::from_fn(24, 32, |row, col| match tracked(row, col) {
            true => value + noise(row, col),
            false => 0.,
        })
        .unwrap()
    };

    (field(dx), field(dy))
}

#[test]
fn resolves_camera_rotation() {
    let (dx, dy) = flow(-6., 8.);
    let state = AngleResolver::new(1.).resolve(&dx, &dy).unwrap();

    assert!(!state.used_fallback);
    assert_relative_eq!(state.degrees(), 53.13, epsilon = 0.5);
    assert_relative_eq!(state.delta.x, -6., epsilon = 0.2);
    assert_relative_eq!(state.delta.y, 8., epsilon = 0.2);
}

#[test]
fn reversed_flow_is_half_a_turn_away() {
    let (dx, dy) = flow(-6., 8.);
    let forward = AngleResolver::new(1.).resolve(&dx, &dy).unwrap();

    let (dx, dy) = flow(6., -8.);
    let reverse = AngleResolver::new(1.).resolve(&dx, &dy).unwrap();

    assert_relative_eq!(forward.degrees() - reverse.degrees(), 180., epsilon = 0.5);
}

#[test]
fn settings_thresholds_apply() {
    let settings = Settings {
        pixel_value_threshold: 80.,
        ..Default::default()
    };
    let (dx, dy) = flow(-6., 8.);

    // No pixel angle exceeds 80 degrees, so the estimate falls back to zero.
    let state = AngleResolver::from_settings(&settings).resolve(&dx, &dy).unwrap();
    assert!(state.used_fallback);
    assert_eq!(state.confidence, 0.);
}

#[test]
fn flow_components_must_agree() {
    let dx = ScalarField::filled(4, 4, 1.).unwrap();
    let dy = ScalarField::filled(2, 8, 1.).unwrap();

    assert_eq!(
        flow_disparity(&dx, &dy),
        Err(AngleError::ShapeMismatch {
            dx: Shape::new(4, 4),
            dy: Shape::new(2, 8),
        })
    );
}

#[quickcheck]
fn rotation_is_normalized(dx: i8, dy: i8) -> bool {
    let (dx, dy) = flow(dx as f64, dy as f64);
    let state = AngleResolver::new(1.).resolve(&dx, &dy).unwrap();

    let degrees = state.degrees();
    degrees > -180. && degrees <= 180.
}

#[quickcheck]
fn probe_points_against_x(dx: i8, dy: i8) -> TestResult {
    if dx.unsigned_abs() < 2 && dy.unsigned_abs() < 2 {
        return TestResult::discard();
    }

    let (dx, dy) = flow(dx as f64, dy as f64);
    let state = AngleResolver::new(1.).resolve(&dx, &dy).unwrap();
    let rotated = Rotation2::new(state.degrees().to_radians()) * state.delta;

    TestResult::from_bool(rotated.x <= 1e-9)
}
