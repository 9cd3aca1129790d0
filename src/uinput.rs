//! Virtual relative pointer backed by `/dev/uinput`.
//!
//! The real cursor is moved by other devices too and cannot be read back
//! through uinput, so output is relative: a press lands wherever the cursor
//! is, and every move is sent as the step from the previous command.
use std::fs::OpenOptions;
use std::io;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key, RelativeAxisType};
use log::{info, trace};

use crate::config::TridragError;
use crate::contact::Point;
use crate::sink::{PointerAction, PointerCommand, PointerSink, ScreenSpace, SinkError};

pub const UINPUT_PATH: &str = "/dev/uinput";

/// Name of the virtual device; consumers watching the event stream can use it
/// to recognize our own events, since uinput carries no per-event tag.
pub const VIRTUAL_POINTER_NAME: &str = "tridrag virtual pointer";

/// Whether this process may create uinput devices.
pub fn uinput_accessible() -> bool {
    OpenOptions::new().write(true).open(UINPUT_PATH).is_ok()
}

/// Screen geometry for scaling touch deltas into pixels.
///
/// Strokes are expressed relative to the cursor, so the pointer position is
/// always the origin and no bounds apply.
#[derive(Debug, Clone, Copy)]
pub struct ScreenScale {
    width: f64,
    height: f64,
}

impl ScreenScale {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: f64::from(width),
            height: f64::from(height),
        }
    }
}

impl ScreenSpace for ScreenScale {
    fn pointer_position(&self) -> Point {
        Point::ORIGIN
    }

    fn scale_delta(&self, normalized: Point) -> Point {
        Point::new(normalized.x * self.width, normalized.y * self.height)
    }
}

/// Turns pointer commands into button and `REL_X`/`REL_Y` events.
///
/// Sub-pixel remainders are carried into the next move so a slow drag does
/// not lose distance to rounding.
#[derive(Debug, Default)]
pub struct RelativeMotion {
    last: Option<Point>,
    carry: Point,
}

impl RelativeMotion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&mut self, command: &PointerCommand) -> Vec<InputEvent> {
        match command.action {
            PointerAction::Press => {
                self.last = Some(command.point);
                self.carry = Point::ORIGIN;
                vec![left_button(1)]
            }
            PointerAction::Release => {
                self.last = None;
                self.carry = Point::ORIGIN;
                vec![left_button(0)]
            }
            PointerAction::MoveTo => {
                let Some(last) = self.last.replace(command.point) else {
                    return Vec::new();
                };
                let step = command.point - last + self.carry;
                let (dx, dy) = (step.x.trunc(), step.y.trunc());
                self.carry = Point::new(step.x - dx, step.y - dy);

                [(RelativeAxisType::REL_X, dx), (RelativeAxisType::REL_Y, dy)]
                    .into_iter()
                    .filter(|(_, value)| *value != 0.0)
                    .map(|(axis, value)| InputEvent::new(EventType::RELATIVE, axis.0, value as i32))
                    .collect()
            }
        }
    }
}

fn left_button(value: i32) -> InputEvent {
    InputEvent::new(EventType::KEY, Key::BTN_LEFT.code(), value)
}

/// [`PointerSink`] that writes left-button and relative-motion events to uinput.
pub struct UinputSink {
    device: VirtualDevice,
    motion: RelativeMotion,
}

impl UinputSink {
    pub fn create() -> Result<Self, TridragError> {
        let device = build_device().map_err(TridragError::Uinput)?;
        info!("Created '{VIRTUAL_POINTER_NAME}'");
        Ok(Self {
            device,
            motion: RelativeMotion::new(),
        })
    }
}

fn build_device() -> io::Result<VirtualDevice> {
    let mut keys = AttributeSet::<Key>::new();
    keys.insert(Key::BTN_LEFT);

    let mut axes = AttributeSet::<RelativeAxisType>::new();
    axes.insert(RelativeAxisType::REL_X);
    axes.insert(RelativeAxisType::REL_Y);

    VirtualDeviceBuilder::new()?
        .name(VIRTUAL_POINTER_NAME)
        .with_keys(&keys)?
        .with_relative_axes(&axes)?
        .build()
}

impl PointerSink for UinputSink {
    fn send(&mut self, command: &PointerCommand) -> Result<(), SinkError> {
        let events = self.motion.events(command);
        if !events.is_empty() {
            self.device.emit(&events)?;
        }
        trace!("{} ({} events) tag={:#x}", command.action, events.len(), command.tag.0);
        Ok(())
    }
}
