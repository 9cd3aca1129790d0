//! Touch event classification and frame assembly - no I/O, no hardware, fully testable.
//!
//! evdev reports multitouch state as a stream of per-slot axis updates
//! (protocol B) terminated by `SYN_REPORT`. [`FrameAssembler`] folds that
//! stream into one [`TouchFrame`] per report.
use std::collections::BTreeMap;
use std::time::Instant;

use evdev::{AttributeSetRef, Key};

use crate::contact::{ContactPhase, Point, RawContact, TouchFrame};
use crate::palm::Modifier;

// -- TouchEvent -----------------------------------------------

/// Intermediate representation of a relevant touch event,
/// decoupled from `evdev` types for testability.
#[derive(Debug, Clone, PartialEq)]
pub enum TouchEvent {
    Slot(i32),
    TrackingId(i32),
    PositionX(f64),
    PositionY(f64),
    Pressure(f64),
    TouchMajor(f64),
    FingerUp,
    /// End of a report, stamped in seconds by a [`ReportClock`].
    SynReport(f64),
}

/// Monotonic clock for report timestamps.
///
/// Event timestamps from the kernel follow the wall clock by default and jump
/// when it is stepped, so reports are stamped on arrival instead.
#[derive(Debug, Clone, Copy)]
pub struct ReportClock {
    origin: Instant,
}

impl ReportClock {
    pub fn start() -> Self {
        Self { origin: Instant::now() }
    }

    /// Seconds since [`start`](Self::start).
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

// -- Frame assembly -------------------------------------------

/// Raw value range of one absolute axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Map a raw value into `[0, 1]`.
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

/// Axis ranges reported by a touch device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceAxes {
    pub x: AxisRange,
    pub y: AxisRange,
    pub pressure: Option<AxisRange>,
    pub touch_major: Option<AxisRange>,
}

#[derive(Debug, Clone, Default)]
struct SlotState {
    tracking_id: Option<i32>,
    x: f64,
    y: f64,
    pressure: f64,
    touch_major: f64,
    starting: bool,
    ending: bool,
    previous: Option<(Point, f64)>,
}

/// Folds protocol-B slot updates into whole frames.
#[derive(Debug)]
pub struct FrameAssembler {
    axes: DeviceAxes,
    slots: BTreeMap<i32, SlotState>,
    current_slot: i32,
}

impl FrameAssembler {
    pub fn new(axes: DeviceAxes) -> Self {
        Self {
            axes,
            slots: BTreeMap::new(),
            current_slot: 0,
        }
    }

    /// Forget all slots, e.g. after the device was reopened.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.current_slot = 0;
    }

    /// Apply one event; returns a frame when the event closes a report.
    pub fn apply(&mut self, event: &TouchEvent) -> Option<TouchFrame> {
        match *event {
            TouchEvent::Slot(slot) => self.current_slot = slot,
            // The kernel omits axis values equal to the slot's last ones, so a
            // new contact inherits them.
            TouchEvent::TrackingId(id) => {
                let slot = self.slot();
                slot.tracking_id = Some(id);
                slot.starting = true;
                slot.ending = false;
                slot.previous = None;
            }
            TouchEvent::PositionX(x) => self.slot().x = x,
            TouchEvent::PositionY(y) => self.slot().y = y,
            TouchEvent::Pressure(p) => self.slot().pressure = p,
            TouchEvent::TouchMajor(m) => self.slot().touch_major = m,
            TouchEvent::FingerUp => {
                if let Some(slot) = self.slots.get_mut(&self.current_slot) {
                    slot.ending = true;
                }
            }
            TouchEvent::SynReport(timestamp) => return Some(self.flush(timestamp)),
        }
        None
    }

    fn slot(&mut self) -> &mut SlotState {
        self.slots.entry(self.current_slot).or_default()
    }

    fn flush(&mut self, timestamp: f64) -> TouchFrame {
        let axes = self.axes;
        let contacts = self
            .slots
            .values_mut()
            .filter_map(|slot| {
                let id = slot.tracking_id?;
                let position = Point::new(axes.x.normalize(slot.x), axes.y.normalize(slot.y));
                let velocity = match slot.previous {
                    Some((prev, at)) if timestamp > at => (position - prev) * (1.0 / (timestamp - at)),
                    _ => Point::ORIGIN,
                };
                let phase = if slot.ending {
                    ContactPhase::Ending
                } else if slot.starting {
                    ContactPhase::Starting
                } else {
                    ContactPhase::Active
                };

                slot.previous = Some((position, timestamp));
                slot.starting = false;

                Some(RawContact {
                    id,
                    position,
                    velocity,
                    pressure: axes.pressure.map_or(0.0, |r| r.normalize(slot.pressure)),
                    size: axes.touch_major.map_or(0.0, |r| r.normalize(slot.touch_major)),
                    phase,
                })
            })
            .collect();

        for slot in self.slots.values_mut().filter(|slot| slot.ending) {
            slot.tracking_id = None;
            slot.ending = false;
            slot.previous = None;
        }

        TouchFrame {
            contacts,
            timestamp,
            modifiers: Vec::new(),
        }
    }
}

// -- Core processing ------------------------------------------

/// Feed a sequence of [`TouchEvent`]s into an assembler and collect the
/// completed frames.  This is the **core event-processing logic** - pure,
/// deterministic, and fully testable without hardware.
pub fn process_touch_events(assembler: &mut FrameAssembler, events: &[TouchEvent]) -> Vec<TouchFrame> {
    events.iter().filter_map(|e| assembler.apply(e)).collect()
}

// -- Helpers --------------------------------------------------

/// Parse a USB vendor:product ID string into `(vendor, product)`.
///
/// Accepts formats like `"1234:5678"` or `"USB:1234:5678"` (case-insensitive).
/// Returns `None` if the format is invalid or the hex values cannot be parsed.
pub fn parse_usb_id(raw: &str) -> Option<(u16, u16)> {
    let cleaned = raw.to_lowercase().replace("usb:", "");
    let (vendor_str, product_str) = cleaned.split_once(':')?;
    let vendor = u16::from_str_radix(vendor_str, 16).ok()?;
    let product = u16::from_str_radix(product_str, 16).ok()?;
    Some((vendor, product))
}

/// Modifiers held according to a keyboard's key state.
pub fn held_modifiers(keys: &AttributeSetRef<Key>) -> Vec<Modifier> {
    [
        (Modifier::Shift, [Key::KEY_LEFTSHIFT, Key::KEY_RIGHTSHIFT]),
        (Modifier::Control, [Key::KEY_LEFTCTRL, Key::KEY_RIGHTCTRL]),
        (Modifier::Alt, [Key::KEY_LEFTALT, Key::KEY_RIGHTALT]),
        (Modifier::Super, [Key::KEY_LEFTMETA, Key::KEY_RIGHTMETA]),
    ]
    .into_iter()
    .filter(|(_, pair)| pair.iter().any(|k| keys.contains(*k)))
    .map(|(modifier, _)| modifier)
    .collect()
}

/// Classify a single `evdev::InputEvent` into one of the touch-relevant
/// categories the assembler cares about.  Returns `None` for irrelevant events.
/// `SYN_REPORT` is stamped with `clock`, not with the event's own timestamp.
pub fn classify_event(event: &evdev::InputEvent, clock: &ReportClock) -> Option<TouchEvent> {
    use evdev::{AbsoluteAxisType, InputEventKind};

    match event.kind() {
        InputEventKind::AbsAxis(axis) => match axis {
            AbsoluteAxisType::ABS_MT_SLOT => Some(TouchEvent::Slot(event.value())),
            AbsoluteAxisType::ABS_MT_TRACKING_ID => {
                if event.value() == -1 {
                    Some(TouchEvent::FingerUp)
                } else {
                    Some(TouchEvent::TrackingId(event.value()))
                }
            }
            AbsoluteAxisType::ABS_MT_POSITION_X => {
                Some(TouchEvent::PositionX(event.value() as f64))
            }
            AbsoluteAxisType::ABS_MT_POSITION_Y => {
                Some(TouchEvent::PositionY(event.value() as f64))
            }
            AbsoluteAxisType::ABS_MT_PRESSURE => Some(TouchEvent::Pressure(event.value() as f64)),
            AbsoluteAxisType::ABS_MT_TOUCH_MAJOR => {
                Some(TouchEvent::TouchMajor(event.value() as f64))
            }
            _ => None,
        },
        InputEventKind::Synchronization(evdev::Synchronization::SYN_REPORT) => {
            Some(TouchEvent::SynReport(clock.now()))
        }
        _ => None,
    }
}
