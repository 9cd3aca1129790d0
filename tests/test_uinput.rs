//! Tests for the uinput command conversion: pointer commands become button and
//! relative-motion events, no device needed.
use evdev::{EventType, InputEvent, Key, RelativeAxisType};

use tridrag::contact::Point;
use tridrag::sink::{PointerAction, PointerCommand, ScreenSpace, SyntheticTag};
use tridrag::uinput::{RelativeMotion, ScreenScale};

// -- Helpers --------------------------------------------------

fn command(action: PointerAction, x: f64, y: f64) -> PointerCommand {
    PointerCommand {
        action,
        point: Point::new(x, y),
        tag: SyntheticTag::DEFAULT,
    }
}

/// `(type, code, value)` triples, comparable with `assert_eq!`.
fn triples(events: &[InputEvent]) -> Vec<(EventType, u16, i32)> {
    events.iter().map(|e| (e.event_type(), e.code(), e.value())).collect()
}

fn button(value: i32) -> (EventType, u16, i32) {
    (EventType::KEY, Key::BTN_LEFT.code(), value)
}

fn rel_x(value: i32) -> (EventType, u16, i32) {
    (EventType::RELATIVE, RelativeAxisType::REL_X.0, value)
}

fn rel_y(value: i32) -> (EventType, u16, i32) {
    (EventType::RELATIVE, RelativeAxisType::REL_Y.0, value)
}

// -- RelativeMotion -------------------------------------------

#[test]
fn test_drag_becomes_relative_steps() {
    let mut motion = RelativeMotion::new();

    let press = motion.events(&command(PointerAction::Press, 0.0, 0.0));
    let first = motion.events(&command(PointerAction::MoveTo, 25.0, -4.0));
    let second = motion.events(&command(PointerAction::MoveTo, 40.0, -4.0));
    let release = motion.events(&command(PointerAction::Release, 40.0, -4.0));

    assert_eq!(triples(&press), vec![button(1)]);
    assert_eq!(triples(&first), vec![rel_x(25), rel_y(-4)]);
    // No vertical change, no REL_Y event.
    assert_eq!(triples(&second), vec![rel_x(15)]);
    assert_eq!(triples(&release), vec![button(0)]);
}

#[test]
fn test_press_and_release_carry_no_position() {
    let mut motion = RelativeMotion::new();
    let press = motion.events(&command(PointerAction::Press, 960.0, 540.0));
    let release = motion.events(&command(PointerAction::Release, 960.0, 540.0));

    assert!(press.iter().chain(&release).all(|e| e.event_type() == EventType::KEY));
}

#[test]
fn test_sub_pixel_moves_accumulate() {
    let mut motion = RelativeMotion::new();
    motion.events(&command(PointerAction::Press, 0.0, 0.0));

    let steps: Vec<_> = (1..=4)
        .map(|i| triples(&motion.events(&command(PointerAction::MoveTo, 0.4 * i as f64, 0.0))))
        .collect();

    // 0.4, 0.8, 1.2, 1.6: the only whole pixel is crossed on the third move.
    assert!(steps[0].is_empty());
    assert!(steps[1].is_empty());
    assert_eq!(steps[2], vec![rel_x(1)]);
    assert!(steps[3].is_empty());
}

#[test]
fn test_move_without_press_sends_nothing() {
    let mut motion = RelativeMotion::new();
    assert!(motion.events(&command(PointerAction::MoveTo, 50.0, 50.0)).is_empty());
}

#[test]
fn test_next_stroke_starts_from_its_own_press() {
    let mut motion = RelativeMotion::new();
    motion.events(&command(PointerAction::Press, 0.0, 0.0));
    motion.events(&command(PointerAction::MoveTo, 100.5, 0.0));
    motion.events(&command(PointerAction::Release, 100.5, 0.0));

    motion.events(&command(PointerAction::Press, 0.0, 0.0));
    let step = motion.events(&command(PointerAction::MoveTo, 10.0, 0.0));
    // Neither the old position nor the old remainder leaks in.
    assert_eq!(triples(&step), vec![rel_x(10)]);
}

// -- ScreenScale ----------------------------------------------

#[test]
fn test_screen_scale_is_cursor_relative() {
    let screen = ScreenScale::new(1920, 1080);
    assert_eq!(screen.pointer_position(), Point::ORIGIN);
    assert_eq!(screen.bounds(), None);
    assert_eq!(screen.scale_delta(Point::new(0.5, 0.25)), Point::new(960.0, 270.0));
}
