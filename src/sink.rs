//! Pointer output: the interface to the event-injection collaborator and the
//! adapter that keeps press/release pairs balanced.
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::contact::Point;

/// Error returned by a [`PointerSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Pointer sink rejected {action}: {reason}")]
    Rejected {
        action: PointerAction,
        reason: String,
    },

    #[error("Pointer sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum PointerAction {
    #[strum(serialize = "press")]
    Press,
    /// Absolute move while the button is held.
    #[strum(serialize = "move")]
    MoveTo,
    #[strum(serialize = "release")]
    Release,
}

/// Marker attached to every synthetic event so our own echo can be filtered
/// out of an observed event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntheticTag(pub u64);

impl SyntheticTag {
    /// "tridrag" in ASCII.
    pub const DEFAULT: SyntheticTag = SyntheticTag(0x0074_7269_6472_6167);

    pub fn matches(self, value: u64) -> bool {
        self.0 == value
    }
}

impl Default for SyntheticTag {
    fn default() -> Self {
        SyntheticTag::DEFAULT
    }
}

/// One command for the pointer sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerCommand {
    pub action: PointerAction,
    pub point: Point,
    pub tag: SyntheticTag,
}

/// Injects pointer events into the system.
pub trait PointerSink: Send {
    fn send(&mut self, command: &PointerCommand) -> Result<(), SinkError>;

    /// Whether the sink may be used at all. Checked once at engine start.
    fn access_granted(&self) -> bool {
        true
    }
}

/// Screen-coordinate capabilities provided by the platform.
pub trait ScreenSpace: Send + Sync {
    /// Where the pointer currently is, in pixels.
    fn pointer_position(&self) -> Point;

    /// Convert a normalized touch-surface delta into pixels.
    fn scale_delta(&self, normalized: Point) -> Point;

    /// Largest valid pointer position, if the screen is bounded.
    fn bounds(&self) -> Option<Point> {
        None
    }
}

/// Translates gesture output into balanced press/move/release commands.
///
/// A release is only ever sent to match an outstanding press. If the sink
/// fails, the pressed flag is cleared anyway: a sink that cannot take a
/// command cannot be trusted to take the matching release either.
pub struct PointerActions<S: PointerSink> {
    sink: S,
    tag: SyntheticTag,
    click_delay: Duration,
    pressed_at: Option<Point>,
}

impl<S: PointerSink> PointerActions<S> {
    pub fn new(sink: S, tag: SyntheticTag, click_delay: Duration) -> Self {
        Self {
            sink,
            tag,
            click_delay,
            pressed_at: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed_at.is_some()
    }

    pub fn press(&mut self, at: Point) -> Result<(), SinkError> {
        if self.pressed_at.is_some() {
            debug!("Press ignored: button already down");
            return Ok(());
        }
        self.dispatch(PointerAction::Press, at)?;
        self.pressed_at = Some(at);
        Ok(())
    }

    /// Move with the button held. Does nothing when no press is outstanding.
    pub fn move_to(&mut self, to: Point) -> Result<(), SinkError> {
        if self.pressed_at.is_none() {
            return Ok(());
        }
        self.dispatch(PointerAction::MoveTo, to)?;
        self.pressed_at = Some(to);
        Ok(())
    }

    /// Release at `at`. Does nothing when no press is outstanding.
    pub fn release(&mut self, at: Point) -> Result<(), SinkError> {
        if self.pressed_at.take().is_none() {
            debug!("Release ignored: no press outstanding");
            return Ok(());
        }
        self.dispatch(PointerAction::Release, at)
    }

    /// Press, hold for the click delay, release.
    pub fn click(&mut self, at: Point) -> Result<(), SinkError> {
        if self.pressed_at.is_some() {
            warn!("Click requested while a drag is open – ignoring");
            return Ok(());
        }
        self.press(at)?;
        thread::sleep(self.click_delay);
        self.release(at)
    }

    /// Release any outstanding press at the last position it reached.
    ///
    /// Returns whether a release was needed.
    pub fn cancel(&mut self) -> Result<bool, SinkError> {
        match self.pressed_at {
            Some(at) => self.release(at).map(|()| true),
            None => Ok(false),
        }
    }

    fn dispatch(&mut self, action: PointerAction, point: Point) -> Result<(), SinkError> {
        let command = PointerCommand {
            action,
            point,
            tag: self.tag,
        };
        self.sink.send(&command).inspect_err(|_| {
            self.pressed_at = None;
        })
    }
}
