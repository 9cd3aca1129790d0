//! Pointer motion shaping for an open drag stroke.
//!
//! Raw per-frame deltas are smoothed with an exponential moving average,
//! gated against jitter, and accumulated onto a pointer position that the
//! shaper owns for the lifetime of the stroke. The live system pointer is
//! read only once, when the stroke begins: reading it back after every move
//! races against moves the system has not applied yet and makes the cursor
//! snap back.
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::trace;

use crate::config::GestureConfiguration;
use crate::contact::Point;
use crate::sink::ScreenSpace;

/// Horizontal steps below this many pixels count as no horizontal motion.
pub const HORIZONTAL_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaperSettings {
    /// EMA factor in `[0, 1]`: weight of the previous smoothed delta.
    pub smoothing: f64,
    /// Vertical steps below this many pixels are suppressed.
    pub min_movement_px: f64,
    /// Emitted positions are clamped to `[0, bounds]` when set.
    pub bounds: Option<Point>,
}

impl ShaperSettings {
    pub fn from_config(config: &GestureConfiguration, bounds: Option<Point>) -> Self {
        Self {
            smoothing: config.smoothing,
            min_movement_px: config.min_movement_px,
            bounds,
        }
    }
}

impl Default for ShaperSettings {
    fn default() -> Self {
        Self::from_config(&GestureConfiguration::default(), None)
    }
}

/// Mutable shaping state, reset at every stroke boundary.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapingState {
    pub previous_delta: Point,
    pub last_emitted: Option<Point>,
    pub button_down: bool,
}

/// Result of shaping one raw delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedMotion {
    /// Smoothed delta in pixels.
    pub delta: Point,
    /// Absolute pointer position to move to.
    pub position: Point,
}

#[derive(Debug)]
struct Inner {
    settings: ShaperSettings,
    state: ShapingState,
}

/// Thread-safe motion shaper.
///
/// Every operation runs under a single lock, so a read-compute-write of the
/// tracked position is atomic with respect to other callers.
#[derive(Debug)]
pub struct MotionShaper {
    inner: Mutex<Inner>,
}

impl MotionShaper {
    pub fn new(settings: ShaperSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                settings,
                state: ShapingState::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> ShaperSettings {
        self.lock().settings
    }

    /// Takes effect from the next `shape` call; an open stroke stays open.
    pub fn set_settings(&self, settings: ShaperSettings) {
        self.lock().settings = settings;
    }

    pub fn state(&self) -> ShapingState {
        self.lock().state
    }

    pub fn is_button_down(&self) -> bool {
        self.lock().state.button_down
    }

    pub fn last_emitted(&self) -> Option<Point> {
        self.lock().state.last_emitted
    }

    /// Open a stroke at the current pointer position and return that baseline.
    pub fn begin_stroke(&self, screen: &dyn ScreenSpace) -> Point {
        let mut inner = self.lock();
        let baseline = screen.pointer_position();
        inner.state = ShapingState {
            previous_delta: Point::ORIGIN,
            last_emitted: Some(baseline),
            button_down: true,
        };
        trace!("Stroke began at ({:.1}, {:.1})", baseline.x, baseline.y);
        baseline
    }

    /// Smooth a raw pixel delta and advance the tracked position.
    ///
    /// Returns `None` when no stroke is open or the step is too small to emit.
    pub fn shape(&self, dx: f64, dy: f64) -> Option<ShapedMotion> {
        let mut inner = self.lock();
        if !inner.state.button_down {
            return None;
        }

        let factor = inner.settings.smoothing;
        let previous = inner.state.previous_delta;
        let smoothed = Point::new(
            previous.x * factor + dx * (1.0 - factor),
            previous.y * factor + dy * (1.0 - factor),
        );
        inner.state.previous_delta = smoothed;

        // Horizontal motion is gated far more leniently than vertical so slow
        // horizontal panning still moves the pointer.
        if smoothed.x.abs() < HORIZONTAL_EPSILON && smoothed.y.abs() < inner.settings.min_movement_px {
            return None;
        }

        let last = inner.state.last_emitted?;
        let mut position = last + smoothed;
        if let Some(bounds) = inner.settings.bounds {
            position.x = position.x.clamp(0.0, bounds.x);
            position.y = position.y.clamp(0.0, bounds.y);
        }
        inner.state.last_emitted = Some(position);

        Some(ShapedMotion {
            delta: smoothed,
            position,
        })
    }

    /// Close the stroke, returning the last position it emitted.
    pub fn end_stroke(&self) -> Option<Point> {
        let mut inner = self.lock();
        let last = inner.state.last_emitted;
        inner.state = ShapingState::default();
        last
    }
}

impl Default for MotionShaper {
    fn default() -> Self {
        Self::new(ShaperSettings::default())
    }
}
