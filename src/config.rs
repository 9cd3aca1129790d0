//! Configuration data structures, TOML parsing and validation.
//!
//! The config file uses TOML format. Example:
//!
//! ```toml
//! [global]
//! log_level = "info"
//!
//! [global.gesture]
//! finger_count = 3
//! tap_time_max = 0.15
//! tap_move_max = 0.02
//! sensitivity = 1.0
//! smoothing = 0.3
//! min_movement_px = 0.5
//!
//! [global.options]
//! finger_mode = "exact"
//! palm_exclusion_zone = 0.1
//! sensitivity_steps = [{ min_speed = 0.8, factor = 1.6 }]
//!
//! [global.pointer]
//! screen_width = 2560
//! screen_height = 1440
//!
//! [device.touchpad]
//! device_usb_id = "06cb:ce7e"
//! enabled = true
//!
//! [device.touchpad.gesture]
//! sensitivity = 1.4
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::palm::{Modifier, PalmRejection};
use crate::recognizer::{FingerMode, SensitivityCurve, SensitivityStep};

/// Top-level error type used throughout the crate.
#[derive(Debug, Error)]
pub enum TridragError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ConfigParseError { path: PathBuf, message: String },

    #[error("Config validation error for device '{device}': missing setting(s): {missing}")]
    MissingSettings { device: String, missing: String },

    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Config validation error for device '{device}': {source}")]
    InvalidDevice {
        device: String,
        source: Box<TridragError>,
    },

    #[error("Pointer injection is not permitted (is /dev/uinput writable?)")]
    AccessDenied,

    #[error("Failed to create virtual pointer: {0}")]
    Uinput(#[source] std::io::Error),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    #[error("Gesture engine is not running")]
    EngineStopped,
}

impl TridragError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        TridragError::InvalidSetting {
            field,
            reason: reason.into(),
        }
    }
}

/// Root of the TOML config file.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    global: RawGlobal,
    #[serde(default)]
    device: HashMap<String, RawDevice>,
}

/// The `[global]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawGlobal {
    log_level: Option<String>,
    log_file: Option<String>,
    #[serde(default)]
    gesture: RawGesture,
    #[serde(default)]
    options: RawOptions,
    #[serde(default)]
    pointer: RawPointer,
}

/// Required gesture settings - all optional so device sections can partially override.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct RawGesture {
    finger_count: Option<usize>,
    tap_time_max: Option<f64>,
    tap_move_max: Option<f64>,
    sensitivity: Option<f64>,
    smoothing: Option<f64>,
    min_movement_px: Option<f64>,
}

/// Optional gesture settings; anything left unset falls back to the built-in default.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct RawOptions {
    finger_mode: Option<String>,
    require_full_release: Option<bool>,
    sensitivity_steps: Option<Vec<RawSensitivityStep>>,
    palm_exclusion_zone: Option<f64>,
    palm_max_contact_size: Option<f64>,
    required_modifier: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct RawSensitivityStep {
    min_speed: f64,
    factor: f64,
}

/// The `[global.pointer]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawPointer {
    screen_width: Option<u32>,
    screen_height: Option<u32>,
    click_delay_ms: Option<u64>,
    stall_timeout: Option<f64>,
    keyboard_usb_id: Option<String>,
}

/// A `[device.<id>]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawDevice {
    device_usb_id: Option<String>,
    enabled: Option<bool>,
    #[serde(default)]
    gesture: RawGesture,
    #[serde(default)]
    options: RawOptions,
}

/// Required gesture settings after merging - all values guaranteed to be present.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureThresholds {
    pub finger_count: usize,
    pub tap_time_max: f64,
    pub tap_move_max: f64,
    pub sensitivity: f64,
    pub smoothing: f64,
    pub min_movement_px: f64,
}

/// Everything the recognizer and shaper need, replaced as a whole on update.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureConfiguration {
    /// Number of fingers that makes a drag gesture.
    pub finger_count: usize,
    pub finger_mode: FingerMode,
    /// Seconds a gesture may last and still count as a tap.
    pub tap_time_max: f64,
    /// Centroid travel (normalized units) a tap may have.
    pub tap_move_max: f64,
    pub sensitivity: SensitivityCurve,
    /// EMA factor in `[0, 1]`; 0 disables smoothing.
    pub smoothing: f64,
    /// Smallest vertical pointer step (pixels) worth emitting.
    pub min_movement_px: f64,
    /// Wait for every finger to lift before a new gesture may start.
    pub require_full_release: bool,
    pub palm: PalmRejection,
}

impl Default for GestureConfiguration {
    fn default() -> Self {
        Self {
            finger_count: 3,
            finger_mode: FingerMode::Exact,
            tap_time_max: 0.15,
            tap_move_max: 0.02,
            sensitivity: SensitivityCurve::Constant(1.0),
            smoothing: 0.3,
            min_movement_px: 0.5,
            require_full_release: false,
            palm: PalmRejection::default(),
        }
    }
}

impl GestureConfiguration {
    /// Check every field, reporting the first invalid one.
    pub fn validate(&self) -> Result<(), TridragError> {
        if self.finger_count == 0 {
            return Err(TridragError::invalid("finger_count", "must be at least 1"));
        }
        non_negative("tap_time_max", self.tap_time_max)?;
        non_negative("tap_move_max", self.tap_move_max)?;
        non_negative("min_movement_px", self.min_movement_px)?;
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(TridragError::invalid(
                "smoothing",
                format!("{} is outside [0, 1]", self.smoothing),
            ));
        }
        self.sensitivity.validate()?;
        self.palm.validate()
    }

    fn from_parts(thresholds: GestureThresholds, options: &RawOptions) -> Result<Self, TridragError> {
        let finger_mode = match options.finger_mode.as_deref() {
            Some(mode) => FingerMode::from_str(mode)
                .map_err(|_| TridragError::invalid("finger_mode", format!("unknown mode '{mode}'")))?,
            None => FingerMode::Exact,
        };

        let required_modifier = match options.required_modifier.as_deref() {
            None | Some("none") => None,
            Some(name) => Some(Modifier::from_str(name).map_err(|_| {
                TridragError::invalid("required_modifier", format!("unknown modifier '{name}'"))
            })?),
        };

        let steps: Vec<SensitivityStep> = options
            .sensitivity_steps
            .iter()
            .flatten()
            .map(|s| SensitivityStep {
                min_speed: s.min_speed,
                factor: s.factor,
            })
            .collect();
        let sensitivity = if steps.is_empty() {
            SensitivityCurve::Constant(thresholds.sensitivity)
        } else {
            SensitivityCurve::Stepped {
                base: thresholds.sensitivity,
                steps,
            }
        };

        let defaults = PalmRejection::default();
        let config = GestureConfiguration {
            finger_count: thresholds.finger_count,
            finger_mode,
            tap_time_max: thresholds.tap_time_max,
            tap_move_max: thresholds.tap_move_max,
            sensitivity,
            smoothing: thresholds.smoothing,
            min_movement_px: thresholds.min_movement_px,
            require_full_release: options.require_full_release.unwrap_or(false),
            palm: PalmRejection {
                exclusion_zone: options.palm_exclusion_zone.unwrap_or(defaults.exclusion_zone),
                max_contact_size: options
                    .palm_max_contact_size
                    .unwrap_or(defaults.max_contact_size),
                required_modifier,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn non_negative(field: &'static str, value: f64) -> Result<(), TridragError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TridragError::invalid(field, format!("{value} must be a non-negative number")))
    }
}

/// Virtual pointer and watchdog settings, shared by all devices.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerSettings {
    pub screen_width: u32,
    pub screen_height: u32,
    pub click_delay: Duration,
    /// An open drag with no frames for this long is force-released.
    ///
    /// Many touchpads report nothing while fingers rest without moving, so a
    /// paused drag looks exactly like a stalled reader. Keep this well above
    /// the longest pause a user makes mid-drag.
    pub stall_timeout: Duration,
    pub keyboard_usb_id: Option<String>,
}

impl Default for PointerSettings {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            click_delay: Duration::from_millis(10),
            stall_timeout: Duration::from_secs(10),
            keyboard_usb_id: None,
        }
    }
}

impl RawPointer {
    fn into_settings(self) -> Result<PointerSettings, TridragError> {
        let defaults = PointerSettings::default();
        let screen_width = self.screen_width.unwrap_or(defaults.screen_width);
        let screen_height = self.screen_height.unwrap_or(defaults.screen_height);
        if screen_width == 0 || screen_height == 0 {
            return Err(TridragError::invalid("screen_size", "width and height must be non-zero"));
        }

        let stall_timeout = match self.stall_timeout {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            Some(secs) => {
                return Err(TridragError::invalid(
                    "stall_timeout",
                    format!("{secs} must be a positive number of seconds"),
                ));
            }
            None => defaults.stall_timeout,
        };

        Ok(PointerSettings {
            screen_width,
            screen_height,
            click_delay: self
                .click_delay_ms
                .map_or(defaults.click_delay, Duration::from_millis),
            stall_timeout,
            keyboard_usb_id: self.keyboard_usb_id.filter(|s| !s.is_empty()),
        })
    }
}

/// Configuration for a single touch device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_usb_id: String,
    pub gesture: GestureConfiguration,
}

/// Top-level parsed configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub log_level: String,
    pub log_file: Option<String>,
    pub pointer: PointerSettings,
    pub devices: HashMap<String, DeviceConfig>,
}

/// Generate `merge_with_fallback` (and optionally `into_validated`) for raw setting tables.
macro_rules! settings_fields {
    ($raw:ident { $($field:ident),+ $(,)? }) => {
        impl $raw {
            fn merge_with_fallback(&self, fallback: &$raw) -> $raw {
                $raw {
                    $($field: self.$field.clone().or_else(|| fallback.$field.clone()),)+
                }
            }
        }
    };
    ($raw:ident => $validated:ident { $($field:ident),+ $(,)? }) => {
        settings_fields!($raw { $($field),+ });

        impl $raw {
            fn into_validated(self) -> Result<$validated, Vec<&'static str>> {
                let missing: Vec<&str> = [$(
                    if self.$field.is_none() { Some(stringify!($field)) } else { None },
                )+].into_iter().flatten().collect();

                let ($(Some($field),)+) = ($(self.$field,)+) else {
                    return Err(missing);
                };

                Ok($validated { $($field,)+ })
            }
        }
    };
}

settings_fields!(RawGesture => GestureThresholds {
    finger_count,
    tap_time_max,
    tap_move_max,
    sensitivity,
    smoothing,
    min_movement_px,
});

settings_fields!(RawOptions {
    finger_mode,
    require_full_release,
    sensitivity_steps,
    palm_exclusion_zone,
    palm_max_contact_size,
    required_modifier,
});

/// Parse a TOML config file and return the fully resolved `AppConfig`.
pub fn parse_config_file(path: &Path) -> Result<AppConfig, TridragError> {
    let raw: RawConfig =
        toml::from_str(
            &fs::read_to_string(path).map_err(|e| TridragError::ConfigReadError {
                path: path.to_path_buf(),
                source: e,
            })?,
        )
        .map_err(|e| TridragError::ConfigParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut devices = HashMap::new();

    for (device_id, raw_dev) in &raw.device {
        if !raw_dev.enabled.unwrap_or(false) {
            debug!("Device '{device_id}' is not enabled – skipping.");
            continue;
        }

        let Some(usb_id) = raw_dev.device_usb_id.as_deref().filter(|s| !s.is_empty()) else {
            warn!(
                "Device '{device_id}' is enabled but has no device_usb_id – skipping. \
                 Run 'tridrag --list-devices' to find your USB ID.",
            );
            continue;
        };

        let thresholds = raw_dev
            .gesture
            .merge_with_fallback(&raw.global.gesture)
            .into_validated()
            .map_err(|missing| TridragError::MissingSettings {
                device: device_id.to_string(),
                missing: missing.join(", "),
            })?;
        let options = raw_dev.options.merge_with_fallback(&raw.global.options);
        let gesture = GestureConfiguration::from_parts(thresholds, &options).map_err(|e| {
            TridragError::InvalidDevice {
                device: device_id.to_string(),
                source: Box::new(e),
            }
        })?;

        devices.insert(
            device_id.clone(),
            DeviceConfig {
                device_usb_id: usb_id.to_string(),
                gesture,
            },
        );
    }

    Ok(AppConfig {
        log_level: raw.global.log_level.unwrap_or_else(|| "info".to_string()),
        log_file: raw.global.log_file,
        pointer: raw.global.pointer.into_settings()?,
        devices,
    })
}
