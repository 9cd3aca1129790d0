//! Tests for `tridrag::recognizer` - the tap/drag state machine,
//! finger-count policies and sensitivity curves.
use tridrag::config::GestureConfiguration;
use tridrag::contact::{GestureSnapshot, Point};
use tridrag::recognizer::{
    FingerMode, GestureEvent, GestureRecognizer, RecognizerState, SensitivityCurve, SensitivityStep,
};

/// One frame: (finger count, centroid x, centroid y, timestamp).
type Frame = (usize, f64, f64, f64);

fn default_config() -> GestureConfiguration {
    GestureConfiguration {
        finger_count: 3,
        finger_mode: FingerMode::Exact,
        tap_time_max: 0.15,
        tap_move_max: 0.02,
        sensitivity: SensitivityCurve::Constant(1.0),
        ..Default::default()
    }
}

fn make_recognizer(config: Option<GestureConfiguration>) -> GestureRecognizer {
    GestureRecognizer::new(config.unwrap_or_else(default_config))
}

fn snap(count: usize, x: f64, y: f64) -> GestureSnapshot {
    GestureSnapshot {
        centroid: Point::new(x, y),
        active_count: count,
        ..Default::default()
    }
}

/// Feed frames and collect every emitted event.
fn run(rec: &mut GestureRecognizer, frames: &[Frame]) -> Vec<GestureEvent> {
    frames
        .iter()
        .filter_map(|&(n, x, y, t)| rec.process(&mut snap(n, x, y), t))
        .collect()
}

fn is_drag_event(e: &GestureEvent) -> bool {
    matches!(
        e,
        GestureEvent::DragBegan { .. } | GestureEvent::DragUpdated { .. } | GestureEvent::DragEnded
    )
}

/// Three fingers at (0.5, 0.5), moved right 0.025 per frame for `moving` frames, then lifted.
fn drag_frames(moving: usize) -> Vec<Frame> {
    let mut frames = vec![(3, 0.5, 0.5, 0.0)];
    for i in 1..=moving {
        frames.push((3, 0.5 + 0.025 * i as f64, 0.5, 0.01 * i as f64));
    }
    frames.push((0, 0.0, 0.0, 0.01 * (moving + 1) as f64));
    frames
}

// -- Taps -------------------------------------------------

#[test]
fn test_stationary_tap() {
    let mut rec = make_recognizer(None);
    let events = run(
        &mut rec,
        &[
            (3, 0.5, 0.5, 0.0),
            (3, 0.5, 0.5, 0.025),
            (3, 0.5, 0.5, 0.05),
            (0, 0.0, 0.0, 0.05),
        ],
    );
    assert_eq!(
        events,
        vec![
            GestureEvent::Started {
                position: Point::new(0.5, 0.5)
            },
            GestureEvent::Tapped {
                position: Point::new(0.5, 0.5)
            },
        ]
    );
    assert_eq!(rec.state(), RecognizerState::Idle);
}

#[test]
fn test_tap_with_small_jitter_emits_no_drag_events() {
    let mut rec = make_recognizer(None);
    let events = run(
        &mut rec,
        &[
            (3, 0.500, 0.500, 0.00),
            (3, 0.505, 0.502, 0.03),
            (3, 0.495, 0.498, 0.06),
            (3, 0.510, 0.500, 0.09),
            (0, 0.0, 0.0, 0.10),
        ],
    );
    assert_eq!(events.iter().filter(|e| matches!(e, GestureEvent::Tapped { .. })).count(), 1);
    assert!(!events.iter().any(is_drag_event));
}

#[test]
fn test_held_too_long_becomes_drag_not_tap() {
    let mut rec = make_recognizer(None);
    let events = run(
        &mut rec,
        &[(3, 0.5, 0.5, 0.0), (3, 0.5, 0.5, 0.16), (0, 0.0, 0.0, 0.2)],
    );
    assert!(matches!(events[1], GestureEvent::DragBegan { .. }));
    assert_eq!(events[2], GestureEvent::DragEnded);
    assert!(!events.iter().any(|e| matches!(e, GestureEvent::Tapped { .. })));
}

#[test]
fn test_lift_at_exact_tap_time_is_not_a_tap() {
    let mut rec = make_recognizer(None);
    let events = run(&mut rec, &[(3, 0.5, 0.5, 0.0), (0, 0.0, 0.0, 0.15)]);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], GestureEvent::Started { .. }));
}

#[test]
fn test_thresholds_are_strict() {
    let config = GestureConfiguration {
        tap_time_max: 0.5,
        tap_move_max: 0.25,
        ..default_config()
    };
    let mut rec = make_recognizer(Some(config));
    // Exactly at both thresholds: still a tap candidate.
    let events = run(&mut rec, &[(3, 0.5, 0.5, 0.0), (3, 0.75, 0.5, 0.5)]);
    assert_eq!(events.len(), 1);
    assert_eq!(rec.state(), RecognizerState::PossibleTap);
}

// -- Drags ------------------------------------------------

#[test]
fn test_drag_lifecycle() {
    let mut rec = make_recognizer(None);
    let events = run(&mut rec, &drag_frames(14));

    assert!(matches!(events[0], GestureEvent::Started { .. }));
    assert!(matches!(events[1], GestureEvent::DragBegan { .. }));
    assert_eq!(events.last(), Some(&GestureEvent::DragEnded));

    let updates = events
        .iter()
        .filter(|e| matches!(e, GestureEvent::DragUpdated { .. }))
        .count();
    assert!(updates >= 9, "expected at least 9 updates, got {updates}");
    assert_eq!(updates, 13);
    assert_eq!(events.len(), 2 + updates + 1);
}

#[test]
fn test_exactly_one_drag_began_before_updates() {
    let mut rec = make_recognizer(None);
    let events = run(&mut rec, &drag_frames(6));

    let began: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, GestureEvent::DragBegan { .. }))
        .map(|(i, _)| i)
        .collect();
    let first_update = events
        .iter()
        .position(|e| matches!(e, GestureEvent::DragUpdated { .. }))
        .unwrap();
    assert_eq!(began.len(), 1);
    assert!(began[0] < first_update);
}

#[test]
fn test_drag_deltas_follow_centroid() {
    let mut rec = make_recognizer(None);
    let events = run(&mut rec, &drag_frames(3));
    for e in &events {
        if let GestureEvent::DragUpdated { delta } = e {
            assert!((delta.x - 0.025).abs() < 1e-9);
            assert!(delta.y.abs() < 1e-12);
        }
    }
}

#[test]
fn test_constant_sensitivity_scales_deltas() {
    let config = GestureConfiguration {
        sensitivity: SensitivityCurve::Constant(2.0),
        ..default_config()
    };
    let mut rec = make_recognizer(Some(config));
    let events = run(&mut rec, &drag_frames(3));
    let deltas: Vec<Point> = events
        .iter()
        .filter_map(|e| match e {
            GestureEvent::DragUpdated { delta } => Some(*delta),
            _ => None,
        })
        .collect();
    assert_eq!(deltas.len(), 2);
    for d in deltas {
        assert!((d.x - 0.05).abs() < 1e-9);
    }
}

#[test]
fn test_velocity_dependent_sensitivity() {
    let config = GestureConfiguration {
        sensitivity: SensitivityCurve::Stepped {
            base: 1.0,
            steps: vec![SensitivityStep {
                min_speed: 1.0,
                factor: 3.0,
            }],
        },
        ..default_config()
    };
    let mut rec = make_recognizer(Some(config));
    run(&mut rec, &[(3, 0.5, 0.5, 0.0), (3, 0.6, 0.5, 0.01)]);
    assert_eq!(rec.state(), RecognizerState::Dragging);

    let mut slow = snap(3, 0.61, 0.5);
    slow.velocity = Point::new(0.5, 0.0);
    let Some(GestureEvent::DragUpdated { delta }) = rec.process(&mut slow, 0.02) else {
        panic!("expected a drag update");
    };
    assert!((delta.x - 0.01).abs() < 1e-9);

    let mut fast = snap(3, 0.62, 0.5);
    fast.velocity = Point::new(2.0, 0.0);
    let Some(GestureEvent::DragUpdated { delta }) = rec.process(&mut fast, 0.03) else {
        panic!("expected a drag update");
    };
    assert!((delta.x - 0.03).abs() < 1e-9);
}

#[test]
fn test_no_update_without_drag_began_since_idle() {
    let mut rec = make_recognizer(None);
    let mut frames = drag_frames(5);
    frames.extend(drag_frames(5).into_iter().map(|(n, x, y, t)| (n, x, y, t + 1.0)));
    let events = run(&mut rec, &frames);

    let mut drag_open = false;
    for e in &events {
        match e {
            GestureEvent::DragBegan { .. } => drag_open = true,
            GestureEvent::DragUpdated { .. } => assert!(drag_open),
            GestureEvent::DragEnded => drag_open = false,
            _ => {}
        }
    }
}

// -- Finger-count policy ----------------------------------

#[test]
fn test_four_fingers_in_exact_three_mode() {
    let mut rec = make_recognizer(None);
    let events = run(
        &mut rec,
        &[(4, 0.5, 0.5, 0.0), (4, 0.6, 0.5, 0.05), (4, 0.7, 0.5, 0.3)],
    );
    assert!(events.is_empty());
    assert_eq!(rec.state(), RecognizerState::Idle);

    // One finger lifts: classification starts fresh from this frame.
    let events = run(&mut rec, &[(3, 0.7, 0.5, 0.31)]);
    assert_eq!(
        events,
        vec![GestureEvent::Started {
            position: Point::new(0.7, 0.5)
        }]
    );
    assert_eq!(rec.gesture_start_time(), Some(0.31));
}

#[test]
fn test_at_least_mode_accepts_more_fingers() {
    let config = GestureConfiguration {
        finger_mode: FingerMode::AtLeast,
        ..default_config()
    };
    let mut rec = make_recognizer(Some(config));
    let events = run(&mut rec, &[(4, 0.5, 0.5, 0.0), (5, 0.5, 0.5, 0.05), (0, 0.0, 0.0, 0.06)]);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], GestureEvent::Tapped { .. }));
}

#[test]
fn test_fewer_fingers_never_qualify() {
    let mut rec = make_recognizer(None);
    assert!(run(&mut rec, &[(2, 0.5, 0.5, 0.0), (1, 0.5, 0.5, 0.1)]).is_empty());
}

#[test]
fn test_finger_mode_qualifies() {
    assert!(FingerMode::Exact.qualifies(3, 3));
    assert!(!FingerMode::Exact.qualifies(4, 3));
    assert!(FingerMode::AtLeast.qualifies(4, 3));
    assert!(!FingerMode::AtLeast.qualifies(2, 3));
    assert!(!FingerMode::AtLeast.qualifies(0, 0));
}

// -- Reset ------------------------------------------------

#[test]
fn test_reset_is_idempotent() {
    let mut rec = make_recognizer(None);
    run(&mut rec, &[(3, 0.5, 0.5, 0.0), (3, 0.6, 0.5, 0.01)]);
    assert_eq!(rec.state(), RecognizerState::Dragging);

    assert_eq!(rec.reset(), Some(GestureEvent::Cancelled));
    assert_eq!(rec.reset(), None);
    assert_eq!(rec.state(), RecognizerState::Idle);
    assert_eq!(rec.gesture_start_time(), None);
    assert_eq!(rec.start_position(), None);
    assert_eq!(rec.last_position(), None);
}

#[test]
fn test_no_drag_ended_after_reset() {
    let mut rec = make_recognizer(None);
    run(&mut rec, &[(3, 0.5, 0.5, 0.0), (3, 0.6, 0.5, 0.01)]);
    rec.reset();
    assert!(run(&mut rec, &[(0, 0.0, 0.0, 0.02)]).is_empty());
}

// -- AwaitingRelease --------------------------------------

#[test]
fn test_full_release_required_before_rearm() {
    let config = GestureConfiguration {
        require_full_release: true,
        ..default_config()
    };
    let mut rec = make_recognizer(Some(config));
    run(&mut rec, &[(3, 0.5, 0.5, 0.0), (3, 0.6, 0.5, 0.01)]);

    assert_eq!(run(&mut rec, &[(2, 0.6, 0.5, 0.02)]), vec![GestureEvent::DragEnded]);
    assert_eq!(rec.state(), RecognizerState::AwaitingRelease);

    assert!(run(&mut rec, &[(3, 0.6, 0.5, 0.03)]).is_empty());
    assert_eq!(rec.state(), RecognizerState::AwaitingRelease);

    assert!(run(&mut rec, &[(0, 0.0, 0.0, 0.04)]).is_empty());
    assert_eq!(rec.state(), RecognizerState::Idle);

    let events = run(&mut rec, &[(3, 0.5, 0.5, 0.05)]);
    assert!(matches!(events[0], GestureEvent::Started { .. }));
}

#[test]
fn test_gate_failure_goes_idle_by_default() {
    let mut rec = make_recognizer(None);
    run(&mut rec, &[(3, 0.5, 0.5, 0.0), (3, 0.6, 0.5, 0.01), (2, 0.6, 0.5, 0.02)]);
    assert_eq!(rec.state(), RecognizerState::Idle);
}

// -- Snapshot stamping ------------------------------------

#[test]
fn test_snapshot_stamped_with_positions() {
    let mut rec = make_recognizer(None);
    let mut first = snap(3, 0.5, 0.5);
    rec.process(&mut first, 0.0);
    assert_eq!(first.start_position, Some(Point::new(0.5, 0.5)));

    let mut moved = snap(3, 0.6, 0.5);
    rec.process(&mut moved, 0.01);
    assert_eq!(moved.start_position, Some(Point::new(0.5, 0.5)));
    assert_eq!(moved.last_position, Some(Point::new(0.6, 0.5)));

    let mut lifted = snap(0, 0.0, 0.0);
    rec.process(&mut lifted, 0.02);
    assert_eq!(lifted.start_position, None);
}

#[test]
fn test_set_config_keeps_gesture() {
    let mut rec = make_recognizer(None);
    run(&mut rec, &[(3, 0.5, 0.5, 0.0)]);
    rec.set_config(GestureConfiguration {
        tap_time_max: 1.0,
        ..default_config()
    });
    assert_eq!(rec.state(), RecognizerState::PossibleTap);
    assert_eq!(rec.config().tap_time_max, 1.0);
}

// -- SensitivityCurve -------------------------------------

#[test]
fn test_stepped_curve_picks_highest_reached_step() {
    let curve = SensitivityCurve::Stepped {
        base: 1.0,
        steps: vec![
            SensitivityStep {
                min_speed: 0.5,
                factor: 1.5,
            },
            SensitivityStep {
                min_speed: 1.0,
                factor: 2.0,
            },
        ],
    };
    assert_eq!(curve.factor(0.1), 1.0);
    assert_eq!(curve.factor(0.5), 1.5);
    assert_eq!(curve.factor(0.9), 1.5);
    assert_eq!(curve.factor(4.0), 2.0);
    assert_eq!(SensitivityCurve::default().factor(10.0), 1.0);
}
