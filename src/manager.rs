//! Device discovery and the per-device read loops (I/O layer).
//!
//! Each enabled device gets a reader thread that owns a [`GestureEngine`] and a
//! stall watchdog. Frame assembly lives in [`crate::event`].
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use evdev::{AbsoluteAxisType, Device, InputEvent, Key};
use log::{debug, error, info, warn};

use crate::config::{AppConfig, DeviceConfig, PointerSettings, TridragError, parse_config_file};
use crate::engine::GestureEngine;
use crate::event::{
    AxisRange, DeviceAxes, FrameAssembler, ReportClock, classify_event, held_modifiers, parse_usb_id,
};
use crate::palm::Modifier;
use crate::sink::ScreenSpace;
use crate::uinput::{ScreenScale, UINPUT_PATH, UinputSink, uinput_accessible};

const WATCHDOG_INTERVAL: Duration = Duration::from_millis(250);
const RECONNECT_ATTEMPTS: usize = 10;
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

// -- GestureManager -------------------------------------------

/// Runs one gesture engine per configured touch device.
pub struct GestureManager {
    config: AppConfig,
    running: Arc<AtomicBool>,
}

impl GestureManager {
    pub fn new(config_path: impl AsRef<std::path::Path>) -> Result<Self, TridragError> {
        Ok(Self {
            config: parse_config_file(config_path.as_ref())?,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Clearing this flag stops every reader and releases the pointer.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Start a reader for every configured device that is present and block
    /// until all of them stop.
    ///
    /// Returns `false` if nothing could be started.
    pub fn start(&self) -> bool {
        if self.config.devices.is_empty() {
            error!("The configuration enables no devices");
            return false;
        }
        if !uinput_accessible() {
            error!("{UINPUT_PATH} is not writable; run as root or grant access with a udev rule");
            return false;
        }

        self.running.store(true, Ordering::Relaxed);
        let pointer = &self.config.pointer;
        let screen = Arc::new(ScreenScale::new(pointer.screen_width, pointer.screen_height));

        let readers: Vec<JoinHandle<()>> = self
            .config
            .devices
            .iter()
            .filter_map(|(name, device)| self.spawn_reader(name, device, &screen))
            .collect();
        if readers.is_empty() {
            error!("None of the configured devices is present");
            return false;
        }

        info!("Watching {} device(s)", readers.len());
        for reader in readers {
            if reader.join().is_err() {
                error!("A device reader panicked");
            }
        }
        true
    }

    fn spawn_reader(
        &self,
        name: &str,
        config: &DeviceConfig,
        screen: &Arc<ScreenScale>,
    ) -> Option<JoinHandle<()>> {
        let device = find_touch_device(name, config)?;
        let reader = DeviceReader {
            name: name.to_string(),
            config: config.clone(),
            pointer: self.config.pointer.clone(),
            screen: Arc::clone(screen),
            running: Arc::clone(&self.running),
            clock: ReportClock::start(),
        };
        thread::Builder::new()
            .name(format!("tridrag-{name}"))
            .spawn(move || reader.run(device))
            .inspect_err(|e| error!("{name}: cannot spawn reader thread: {e}"))
            .ok()
    }

    /// One summary line per enabled device, sorted by name.
    pub fn describe_devices(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .config
            .devices
            .iter()
            .map(|(name, dev)| {
                let g = &dev.gesture;
                format!(
                    "{name} ({}): {} {} finger(s), tap < {}s / {}, smoothing {}",
                    dev.device_usb_id,
                    g.finger_mode,
                    g.finger_count,
                    g.tap_time_max,
                    g.tap_move_max,
                    g.smoothing
                )
            })
            .collect();
        lines.sort();
        lines
    }
}

// -- Device lookup --------------------------------------------

fn is_touch_device(device: &Device) -> bool {
    device.supported_absolute_axes().is_some_and(|axes| {
        axes.contains(AbsoluteAxisType::ABS_MT_POSITION_X)
            && axes.contains(AbsoluteAxisType::ABS_MT_POSITION_Y)
    })
}

fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .is_some_and(|keys| keys.contains(Key::KEY_LEFTSHIFT))
}

/// First device with the given `vendor:product` id that passes `accept`.
fn find_by_usb_id(usb_id: &str, accept: fn(&Device) -> bool) -> Option<Device> {
    let (vendor, product) = parse_usb_id(usb_id)?;
    evdev::enumerate()
        .filter(|(_, device)| accept(device))
        .find(|(_, device)| {
            let id = device.input_id();
            (id.vendor(), id.product()) == (vendor, product)
        })
        .map(|(path, device)| {
            debug!("{usb_id} is {}", path.display());
            device
        })
}

fn find_touch_device(name: &str, config: &DeviceConfig) -> Option<Device> {
    let usb_id = &config.device_usb_id;
    if parse_usb_id(usb_id).is_none() {
        warn!("{name}: '{usb_id}' is not a vendor:product USB id");
        return None;
    }

    let device = find_by_usb_id(usb_id, is_touch_device);
    match &device {
        Some(d) => info!("{name}: using {} ({usb_id})", d.name().unwrap_or("unnamed device")),
        None => warn!("{name}: no multitouch device with USB id {usb_id}"),
    }
    device
}

/// Axis ranges the assembler normalizes against.
fn device_axes(device: &Device) -> std::io::Result<DeviceAxes> {
    let abs = device.get_abs_state()?;
    let supported = device.supported_absolute_axes();
    let range = |axis: AbsoluteAxisType| {
        let info = &abs[axis.0 as usize];
        AxisRange::new(f64::from(info.minimum), f64::from(info.maximum))
    };
    let optional = |axis: AbsoluteAxisType| {
        supported
            .is_some_and(|axes| axes.contains(axis))
            .then(|| range(axis))
    };

    Ok(DeviceAxes {
        x: range(AbsoluteAxisType::ABS_MT_POSITION_X),
        y: range(AbsoluteAxisType::ABS_MT_POSITION_Y),
        pressure: optional(AbsoluteAxisType::ABS_MT_PRESSURE),
        touch_major: optional(AbsoluteAxisType::ABS_MT_TOUCH_MAJOR),
    })
}

/// Keyboard used to answer "which modifiers are held" for palm rejection.
struct ModifierSource {
    keyboard: Option<Device>,
}

impl ModifierSource {
    fn open(config: &DeviceConfig, pointer: &PointerSettings) -> Self {
        let Some(required) = config.gesture.palm.required_modifier else {
            return Self { keyboard: None };
        };
        let keyboard = pointer
            .keyboard_usb_id
            .as_deref()
            .and_then(|usb_id| find_by_usb_id(usb_id, is_keyboard));
        if keyboard.is_none() {
            warn!("'{required}' must be held but no keyboard was found; gestures will never qualify");
        }
        Self { keyboard }
    }

    fn held(&self) -> Vec<Modifier> {
        self.keyboard
            .as_ref()
            .and_then(|kb| kb.get_key_state().ok())
            .map(|keys| held_modifiers(&keys))
            .unwrap_or_default()
    }
}

// -- Per-device reader ----------------------------------------

enum ReadOutcome {
    Stopped,
    Disconnected,
}

struct DeviceReader {
    name: String,
    config: DeviceConfig,
    pointer: PointerSettings,
    screen: Arc<ScreenScale>,
    running: Arc<AtomicBool>,
    clock: ReportClock,
}

impl DeviceReader {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn run(self, mut device: Device) {
        let name = self.name.as_str();
        let axes = match device_axes(&device) {
            Ok(axes) => axes,
            Err(e) => {
                error!("{name}: cannot read axis ranges: {e}");
                return;
            }
        };
        debug!(
            "{name}: x {}..{}, y {}..{}",
            axes.x.min, axes.x.max, axes.y.min, axes.y.max
        );

        let sink = match UinputSink::create() {
            Ok(sink) => sink,
            Err(e) => {
                error!("{name}: {e}");
                return;
            }
        };
        let screen: Arc<dyn ScreenSpace> = self.screen.clone();
        let engine = match GestureEngine::start(self.config.gesture.clone(), self.pointer.click_delay, sink, screen) {
            Ok(engine) => engine,
            Err(e) => {
                error!("{name}: {e}");
                return;
            }
        };

        let mut assembler = FrameAssembler::new(axes);
        let modifiers = ModifierSource::open(&self.config, &self.pointer);
        let reading = AtomicBool::new(true);

        thread::scope(|scope| {
            scope.spawn(|| self.watchdog(&engine, &reading));
            while let ReadOutcome::Disconnected = self.pump(&mut device, &mut assembler, &engine, &modifiers) {
                // Lifted fingers are never reported by a vanished device.
                engine.cancel();
                assembler.reset();
                let Some(next) = self.reconnect() else {
                    break;
                };
                if let Ok(axes) = device_axes(&next) {
                    assembler = FrameAssembler::new(axes);
                }
                device = next;
            }
            reading.store(false, Ordering::Relaxed);
        });

        engine.shutdown();
        info!("{name}: reader stopped");
    }

    /// Read events and submit assembled frames until stopped or the device goes away.
    fn pump(
        &self,
        device: &mut Device,
        assembler: &mut FrameAssembler,
        engine: &GestureEngine,
        modifiers: &ModifierSource,
    ) -> ReadOutcome {
        while self.is_running() {
            let events: Vec<InputEvent> = match device.fetch_events() {
                Ok(events) => events.collect(),
                Err(e) if self.is_running() => {
                    warn!("{}: device lost: {e}", self.name);
                    return ReadOutcome::Disconnected;
                }
                Err(_) => break,
            };

            let frames = events
                .iter()
                .filter_map(|event| classify_event(event, &self.clock))
                .filter_map(|touch| assembler.apply(&touch));
            for mut frame in frames {
                frame.modifiers = modifiers.held();
                if let Err(e) = engine.submit(frame) {
                    error!("{}: {e}", self.name);
                    return ReadOutcome::Stopped;
                }
            }
        }
        ReadOutcome::Stopped
    }

    fn reconnect(&self) -> Option<Device> {
        for attempt in 1..=RECONNECT_ATTEMPTS {
            thread::sleep(RECONNECT_INTERVAL);
            if !self.is_running() {
                return None;
            }
            debug!("{}: looking for device ({attempt}/{RECONNECT_ATTEMPTS})", self.name);
            if let Some(device) = find_touch_device(&self.name, &self.config) {
                info!("{}: device is back", self.name);
                return Some(device);
            }
        }
        error!("{}: gave up after {RECONNECT_ATTEMPTS} reconnect attempts", self.name);
        None
    }

    /// Force-release drags whose frames stopped arriving.
    fn watchdog(&self, engine: &GestureEngine, reading: &AtomicBool) {
        let timeout = self.pointer.stall_timeout;
        while self.is_running() && reading.load(Ordering::Relaxed) {
            thread::sleep(WATCHDOG_INTERVAL);
            if engine.status().is_stalled(timeout) {
                engine.force_release();
            }
        }
    }
}

// -- Listing --------------------------------------------------

/// Print every multitouch device with the USB id to put in the config.
pub fn list_touch_devices() -> ExitCode {
    let found: Vec<_> = evdev::enumerate()
        .filter(|(_, device)| is_touch_device(device))
        .collect();
    if found.is_empty() {
        eprintln!(
            "No multitouch devices found.\n\
             Input devices are often readable by root only; try again with sudo."
        );
        return ExitCode::FAILURE;
    }

    println!("Multitouch devices:\n");
    for (path, device) in &found {
        let id = device.input_id();
        println!(
            "  {:04x}:{:04x}  {}\n              {}",
            id.vendor(),
            id.product(),
            device.name().unwrap_or("unnamed device"),
            path.display()
        );
        if let Ok(abs) = device.get_abs_state() {
            let slots = abs[AbsoluteAxisType::ABS_MT_SLOT.0 as usize].maximum + 1;
            let note = if slots < 3 { " (too few for three-finger drag)" } else { "" };
            println!("              {slots} touch slot(s){note}");
        }
    }

    println!(
        "\nEnable a device in the config file:\n\n\
         \x20 [device.touchpad]\n\
         \x20 device_usb_id = \"vvvv:pppp\"\n\
         \x20 enabled = true"
    );
    ExitCode::SUCCESS
}
