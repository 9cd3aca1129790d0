//! Drag gesture recognition engine.
//!
//! [`GestureRecognizer`] is a per-frame state machine: it is fed one
//! [`GestureSnapshot`] per frame and decides, from the finger count, centroid
//! travel and elapsed frame time, whether the user is tapping or dragging.
use log::debug;
use strum::{Display, EnumString, IntoStaticStr};

use crate::config::{GestureConfiguration, TridragError, non_negative};
use crate::contact::{GestureSnapshot, Point};

/// How the active finger count is compared with the configured count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum FingerMode {
    #[strum(serialize = "exact")]
    Exact,
    #[strum(serialize = "at_least")]
    AtLeast,
}

impl FingerMode {
    pub fn qualifies(self, count: usize, required: usize) -> bool {
        if count == 0 {
            return false;
        }
        match self {
            FingerMode::Exact => count == required,
            FingerMode::AtLeast => count >= required,
        }
    }
}

/// Sensitivity used once the mean contact speed reaches `min_speed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensitivityStep {
    /// Normalized units per second.
    pub min_speed: f64,
    pub factor: f64,
}

/// Maps instantaneous contact speed to a delta multiplier.
#[derive(Debug, Clone, PartialEq)]
pub enum SensitivityCurve {
    Constant(f64),
    /// `base` below the first step, otherwise the factor of the highest step reached.
    Stepped {
        base: f64,
        steps: Vec<SensitivityStep>,
    },
}

impl Default for SensitivityCurve {
    fn default() -> Self {
        SensitivityCurve::Constant(1.0)
    }
}

impl SensitivityCurve {
    pub fn factor(&self, speed: f64) -> f64 {
        match self {
            SensitivityCurve::Constant(factor) => *factor,
            SensitivityCurve::Stepped { base, steps } => steps
                .iter()
                .rev()
                .find(|step| speed >= step.min_speed)
                .map_or(*base, |step| step.factor),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), TridragError> {
        let positive = |value: f64| value.is_finite() && value > 0.0;
        match self {
            SensitivityCurve::Constant(factor) if !positive(*factor) => Err(TridragError::invalid(
                "sensitivity",
                format!("{factor} must be a positive number"),
            )),
            SensitivityCurve::Constant(_) => Ok(()),
            SensitivityCurve::Stepped { base, steps } => {
                if !positive(*base) {
                    return Err(TridragError::invalid(
                        "sensitivity",
                        format!("{base} must be a positive number"),
                    ));
                }
                for step in steps {
                    non_negative("sensitivity_steps", step.min_speed)?;
                    if !positive(step.factor) {
                        return Err(TridragError::invalid(
                            "sensitivity_steps",
                            format!("factor {} must be a positive number", step.factor),
                        ));
                    }
                }
                if steps.windows(2).any(|w| w[0].min_speed >= w[1].min_speed) {
                    return Err(TridragError::invalid(
                        "sensitivity_steps",
                        "steps must be sorted by strictly increasing min_speed",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Recognizer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum RecognizerState {
    #[strum(serialize = "idle")]
    Idle,
    #[strum(serialize = "possible_tap")]
    PossibleTap,
    #[strum(serialize = "dragging")]
    Dragging,
    /// A gesture ended but fingers are still down; re-arms once all lift.
    #[strum(serialize = "awaiting_release")]
    AwaitingRelease,
}

/// Gesture lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
pub enum GestureEvent {
    #[strum(serialize = "started")]
    Started { position: Point },
    #[strum(serialize = "tapped")]
    Tapped { position: Point },
    #[strum(serialize = "drag_began")]
    DragBegan { position: Point },
    /// Normalized centroid delta, already scaled by sensitivity.
    #[strum(serialize = "drag_updated")]
    DragUpdated { delta: Point },
    #[strum(serialize = "drag_ended")]
    DragEnded,
    /// A non-idle gesture was interrupted by [`GestureRecognizer::reset`].
    #[strum(serialize = "cancelled")]
    Cancelled,
}

/// Tap/drag state machine over per-frame gesture snapshots.
#[derive(Debug)]
pub struct GestureRecognizer {
    config: GestureConfiguration,
    state: RecognizerState,
    gesture_start_time: Option<f64>,
    start_position: Option<Point>,
    last_position: Option<Point>,
}

impl GestureRecognizer {
    pub fn new(config: GestureConfiguration) -> Self {
        Self {
            config,
            state: RecognizerState::Idle,
            gesture_start_time: None,
            start_position: None,
            last_position: None,
        }
    }

    pub fn config(&self) -> &GestureConfiguration {
        &self.config
    }

    /// Replace the configuration. A gesture in progress continues under the new values.
    pub fn set_config(&mut self, config: GestureConfiguration) {
        self.config = config;
    }

    pub fn state(&self) -> RecognizerState {
        self.state
    }

    pub fn gesture_start_time(&self) -> Option<f64> {
        self.gesture_start_time
    }

    pub fn start_position(&self) -> Option<Point> {
        self.start_position
    }

    pub fn last_position(&self) -> Option<Point> {
        self.last_position
    }

    /// Whether `count` fingers satisfy the configured finger policy.
    pub fn is_qualifying(&self, count: usize) -> bool {
        self.config
            .finger_mode
            .qualifies(count, self.config.finger_count)
    }

    /// Advance the state machine by one frame.
    ///
    /// The snapshot is stamped with the gesture's start and last positions.
    pub fn process(&mut self, snapshot: &mut GestureSnapshot, timestamp: f64) -> Option<GestureEvent> {
        let event = if self.is_qualifying(snapshot.active_count) {
            self.advance(snapshot, timestamp)
        } else {
            self.release(snapshot.active_count, timestamp)
        };

        snapshot.start_position = self.start_position;
        snapshot.last_position = self.last_position;
        event
    }

    /// Force the recognizer back to idle.
    ///
    /// Returns [`GestureEvent::Cancelled`] if a gesture was in progress.
    pub fn reset(&mut self) -> Option<GestureEvent> {
        let was = self.state;
        self.clear();
        if was == RecognizerState::Idle {
            None
        } else {
            debug!("Gesture cancelled while {was}");
            Some(GestureEvent::Cancelled)
        }
    }

    fn advance(&mut self, snapshot: &GestureSnapshot, timestamp: f64) -> Option<GestureEvent> {
        let centroid = snapshot.centroid;

        match self.state {
            RecognizerState::Idle => {
                self.state = RecognizerState::PossibleTap;
                self.gesture_start_time = Some(timestamp);
                self.start_position = Some(centroid);
                self.last_position = Some(centroid);
                debug!(
                    "{}-finger gesture started at ({:.3}, {:.3})",
                    snapshot.active_count, centroid.x, centroid.y
                );
                Some(GestureEvent::Started { position: centroid })
            }
            RecognizerState::PossibleTap => {
                let elapsed = timestamp - self.gesture_start_time.unwrap_or(timestamp);
                let movement = self
                    .start_position
                    .map_or(0.0, |start| start.distance_to(&centroid));

                if movement > self.config.tap_move_max || elapsed > self.config.tap_time_max {
                    self.state = RecognizerState::Dragging;
                    self.last_position = Some(centroid);
                    debug!("Drag began (moved {movement:.4}, {elapsed:.3}s)");
                    Some(GestureEvent::DragBegan { position: centroid })
                } else {
                    None
                }
            }
            RecognizerState::Dragging => {
                // First frame without a reference point only seeds it.
                let last = self.last_position.replace(centroid)?;
                let factor = self.config.sensitivity.factor(snapshot.velocity.length());
                Some(GestureEvent::DragUpdated {
                    delta: (centroid - last) * factor,
                })
            }
            RecognizerState::AwaitingRelease => None,
        }
    }

    fn release(&mut self, remaining: usize, timestamp: f64) -> Option<GestureEvent> {
        match self.state {
            RecognizerState::Idle => return None,
            RecognizerState::AwaitingRelease => {
                if remaining == 0 {
                    debug!("All contacts lifted, re-armed");
                    self.clear();
                }
                return None;
            }
            RecognizerState::PossibleTap | RecognizerState::Dragging => {}
        }

        let elapsed = timestamp - self.gesture_start_time.unwrap_or(timestamp);
        let event = match self.state {
            RecognizerState::PossibleTap if elapsed < self.config.tap_time_max => {
                debug!("Tap after {elapsed:.3}s");
                self.start_position
                    .or(self.last_position)
                    .map(|position| GestureEvent::Tapped { position })
            }
            RecognizerState::Dragging => {
                debug!("Drag ended after {elapsed:.3}s");
                Some(GestureEvent::DragEnded)
            }
            _ => None,
        };

        self.clear();
        if self.config.require_full_release && remaining > 0 {
            self.state = RecognizerState::AwaitingRelease;
        }
        event
    }

    fn clear(&mut self) {
        self.state = RecognizerState::Idle;
        self.gesture_start_time = None;
        self.start_position = None;
        self.last_position = None;
    }
}
