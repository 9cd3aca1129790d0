//! Gesture engine: wires tracker, recognizer, shaper and pointer sink together.
//!
//! Frames are classified on one dedicated thread and pointer commands are
//! issued on another, each draining a FIFO channel. Nothing on the
//! classification side ever waits for the pointer sink.
//!
//! ```text
//! submit(frame) ─▶ [tridrag-classify] tracker → palm filter → recognizer
//!                          │ Emission (FIFO)
//!                          ▼
//!                  [tridrag-emit] shaper → PointerActions → sink
//! ```
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use strum::{Display, IntoStaticStr};

use crate::config::{GestureConfiguration, TridragError};
use crate::contact::{ContactTracker, GestureSnapshot, Point, TouchFrame};
use crate::recognizer::{GestureEvent, GestureRecognizer, RecognizerState};
use crate::shaper::{MotionShaper, ShaperSettings};
use crate::sink::{PointerActions, PointerSink, ScreenSpace, SinkError, SyntheticTag};

/// Receives gesture notifications.
///
/// Callbacks run on the classification or emission thread; they must not
/// call [`GestureEngine::shutdown`].
pub trait GestureObserver: Send + Sync {
    fn on_gesture(&self, event: &GestureEvent);

    fn on_sink_error(&self, _error: &SinkError) {}
}

/// Non-owning observer list; dropped observers are pruned on the next notify.
#[derive(Default)]
struct ObserverRegistry {
    observers: Mutex<Vec<Weak<dyn GestureObserver>>>,
}

impl ObserverRegistry {
    fn register(&self, observer: &Arc<dyn GestureObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(observer));
    }

    fn notify(&self, f: impl Fn(&dyn GestureObserver)) {
        let live: Vec<Arc<dyn GestureObserver>> = {
            let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            f(observer.as_ref());
        }
    }
}

/// Why the recognizer was forced back to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
enum ResetReason {
    #[strum(serialize = "cancel")]
    Cancel,
    #[strum(serialize = "watchdog")]
    Watchdog,
    #[strum(serialize = "sink failure")]
    SinkFailure,
    #[strum(serialize = "shutdown")]
    Shutdown,
}

enum Control {
    Frame(TouchFrame),
    Configure(GestureConfiguration),
    Reset(ResetReason),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Emission {
    BeginStroke,
    /// Pixel delta.
    Move(Point),
    EndStroke,
    Click,
    Cancel,
    Shutdown,
}

/// Point-in-time view of the engine, for watchdogs and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStatus {
    pub state: RecognizerState,
    pub last_frame_at: Option<Instant>,
    pub button_down: bool,
}

impl EngineStatus {
    /// Whether a drag is open and no frame arrived for longer than `timeout`.
    pub fn is_stalled(&self, timeout: Duration) -> bool {
        self.state == RecognizerState::Dragging
            && self
                .last_frame_at
                .is_some_and(|at| at.elapsed() > timeout)
    }
}

#[derive(Debug, Clone, Copy)]
struct SharedStatus {
    state: RecognizerState,
    last_frame_at: Option<Instant>,
}

fn lock_status(status: &Mutex<SharedStatus>) -> MutexGuard<'_, SharedStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Explicitly owned gesture engine.
///
/// All methods take `&self` and may be called from any thread.
pub struct GestureEngine {
    control: Sender<Control>,
    shaper: Arc<MotionShaper>,
    status: Arc<Mutex<SharedStatus>>,
    observers: Arc<ObserverRegistry>,
    workers: Vec<JoinHandle<()>>,
}

impl GestureEngine {
    /// Validate `config`, check sink access and spawn the worker threads.
    pub fn start<S>(
        config: GestureConfiguration,
        click_delay: Duration,
        sink: S,
        screen: Arc<dyn ScreenSpace>,
    ) -> Result<Self, TridragError>
    where
        S: PointerSink + 'static,
    {
        config.validate()?;
        if !sink.access_granted() {
            return Err(TridragError::AccessDenied);
        }

        let (control_tx, control_rx) = mpsc::channel();
        let (emit_tx, emit_rx) = mpsc::channel();
        let shaper = Arc::new(MotionShaper::new(ShaperSettings::from_config(
            &config,
            screen.bounds(),
        )));
        let status = Arc::new(Mutex::new(SharedStatus {
            state: RecognizerState::Idle,
            last_frame_at: None,
        }));
        let observers = Arc::new(ObserverRegistry::default());

        let emitter = Emitter {
            actions: PointerActions::new(sink, SyntheticTag::DEFAULT, click_delay),
            shaper: Arc::clone(&shaper),
            screen: Arc::clone(&screen),
            observers: Arc::clone(&observers),
            control: control_tx.clone(),
        };
        let emit_handle = thread::Builder::new()
            .name("tridrag-emit".to_string())
            .spawn(move || emitter.run(emit_rx))
            .map_err(|source| TridragError::Spawn {
                name: "tridrag-emit",
                source,
            })?;

        let classifier = Classifier {
            tracker: ContactTracker::new(),
            recognizer: GestureRecognizer::new(config),
            shaper: Arc::clone(&shaper),
            screen,
            emit: emit_tx,
            observers: Arc::clone(&observers),
            status: Arc::clone(&status),
        };
        let classify_handle = thread::Builder::new()
            .name("tridrag-classify".to_string())
            .spawn(move || classifier.run(control_rx))
            .map_err(|source| TridragError::Spawn {
                name: "tridrag-classify",
                source,
            })?;

        info!("Gesture engine started");
        Ok(Self {
            control: control_tx,
            shaper,
            status,
            observers,
            workers: vec![classify_handle, emit_handle],
        })
    }

    /// Queue a touch frame for classification.
    pub fn submit(&self, frame: TouchFrame) -> Result<(), TridragError> {
        self.send(Control::Frame(frame))
    }

    /// Replace the whole gesture configuration.
    ///
    /// An invalid configuration is rejected and the current one stays in effect.
    pub fn configure(&self, config: GestureConfiguration) -> Result<(), TridragError> {
        config.validate()?;
        self.send(Control::Configure(config))
    }

    /// Return the recognizer to idle and release any outstanding press.
    pub fn cancel(&self) {
        let _ = self.send(Control::Reset(ResetReason::Cancel));
    }

    /// Recovery for a stalled producer: same effect as [`cancel`](Self::cancel).
    pub fn force_release(&self) {
        warn!("Force-releasing a stalled drag");
        let _ = self.send(Control::Reset(ResetReason::Watchdog));
    }

    /// Register an observer without extending its lifetime.
    pub fn subscribe(&self, observer: &Arc<dyn GestureObserver>) {
        self.observers.register(observer);
    }

    pub fn status(&self) -> EngineStatus {
        let shared = *lock_status(&self.status);
        EngineStatus {
            state: shared.state,
            last_frame_at: shared.last_frame_at,
            button_down: self.shaper.is_button_down(),
        }
    }

    /// Drain queued work, release any press and join the worker threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, control: Control) -> Result<(), TridragError> {
        self.control
            .send(control)
            .map_err(|_| TridragError::EngineStopped)
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        let _ = self.send(Control::Shutdown);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Gesture engine worker panicked");
            }
        }
        info!("Gesture engine stopped");
    }
}

impl Drop for GestureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// -- Classification sequence ----------------------------------

struct Classifier {
    tracker: ContactTracker,
    recognizer: GestureRecognizer,
    shaper: Arc<MotionShaper>,
    screen: Arc<dyn ScreenSpace>,
    emit: Sender<Emission>,
    observers: Arc<ObserverRegistry>,
    status: Arc<Mutex<SharedStatus>>,
}

impl Classifier {
    fn run(mut self, rx: Receiver<Control>) {
        while let Ok(control) = rx.recv() {
            match control {
                Control::Frame(frame) => self.handle_frame(&frame),
                Control::Configure(config) => {
                    self.shaper
                        .set_settings(ShaperSettings::from_config(&config, self.screen.bounds()));
                    self.recognizer.set_config(config);
                    info!("Gesture configuration updated");
                }
                Control::Reset(reason) => self.reset(reason),
                Control::Shutdown => {
                    self.reset(ResetReason::Shutdown);
                    break;
                }
            }
        }
        let _ = self.emit.send(Emission::Shutdown);
    }

    fn handle_frame(&mut self, frame: &TouchFrame) {
        let active = self.tracker.update(frame);
        let qualifying = self
            .recognizer
            .config()
            .palm
            .filter(active, &frame.modifiers);
        let mut snapshot = GestureSnapshot::from_contacts(&qualifying);
        let event = self.recognizer.process(&mut snapshot, frame.timestamp);
        trace!(
            "t={:.3} n={} centroid=({:.3}, {:.3}) state={}",
            frame.timestamp,
            snapshot.active_count,
            snapshot.centroid.x,
            snapshot.centroid.y,
            self.recognizer.state()
        );

        self.publish_status(Some(Instant::now()));
        if let Some(event) = event {
            self.dispatch(event);
        }
    }

    fn reset(&mut self, reason: ResetReason) {
        debug!("Resetting recognizer ({reason})");
        self.tracker.reset();
        let event = self.recognizer.reset();
        // Unconditional: the emission side may hold a press the recognizer no longer knows about.
        let _ = self.emit.send(Emission::Cancel);
        self.publish_status(None);
        if let Some(event) = event {
            self.observers.notify(|o| o.on_gesture(&event));
        }
    }

    fn dispatch(&self, event: GestureEvent) {
        let name: &str = event.into();
        debug!("Gesture event: {name}");

        let emission = match event {
            GestureEvent::Started { .. } | GestureEvent::Cancelled => None,
            GestureEvent::Tapped { .. } => Some(Emission::Click),
            GestureEvent::DragBegan { .. } => Some(Emission::BeginStroke),
            GestureEvent::DragUpdated { delta } => Some(Emission::Move(self.screen.scale_delta(delta))),
            GestureEvent::DragEnded => Some(Emission::EndStroke),
        };
        if let Some(emission) = emission {
            let _ = self.emit.send(emission);
        }
        self.observers.notify(|o| o.on_gesture(&event));
    }

    fn publish_status(&self, frame_at: Option<Instant>) {
        let mut status = lock_status(&self.status);
        status.state = self.recognizer.state();
        if frame_at.is_some() {
            status.last_frame_at = frame_at;
        }
    }
}

// -- Emission sequence ----------------------------------------

struct Emitter<S: PointerSink> {
    actions: PointerActions<S>,
    shaper: Arc<MotionShaper>,
    screen: Arc<dyn ScreenSpace>,
    observers: Arc<ObserverRegistry>,
    control: Sender<Control>,
}

impl<S: PointerSink> Emitter<S> {
    fn run(mut self, rx: Receiver<Emission>) {
        while let Ok(emission) = rx.recv() {
            if emission == Emission::Shutdown {
                break;
            }
            if let Err(e) = self.apply(emission) {
                self.fail(e);
            }
        }

        self.shaper.end_stroke();
        if let Err(e) = self.actions.cancel() {
            error!("Failed to release pointer on shutdown: {e}");
        }
    }

    fn apply(&mut self, emission: Emission) -> Result<(), SinkError> {
        match emission {
            Emission::BeginStroke => {
                let baseline = self.shaper.begin_stroke(self.screen.as_ref());
                self.actions.press(baseline)
            }
            Emission::Move(delta) => match self.shaper.shape(delta.x, delta.y) {
                Some(motion) => self.actions.move_to(motion.position),
                None => Ok(()),
            },
            Emission::EndStroke => {
                let at = self
                    .shaper
                    .end_stroke()
                    .unwrap_or_else(|| self.screen.pointer_position());
                self.actions.release(at)
            }
            Emission::Click => self.actions.click(self.screen.pointer_position()),
            Emission::Cancel => {
                self.shaper.end_stroke();
                if self.actions.cancel()? {
                    info!("Released outstanding press");
                }
                Ok(())
            }
            Emission::Shutdown => Ok(()),
        }
    }

    fn fail(&mut self, error: SinkError) {
        error!("{error}");
        self.shaper.end_stroke();
        self.observers.notify(|o| o.on_sink_error(&error));
        let _ = self.control.send(Control::Reset(ResetReason::SinkFailure));
    }
}
