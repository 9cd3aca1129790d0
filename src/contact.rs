//! Per-finger contact tracking across frames and the snapshot derived from it.
use std::collections::BTreeMap;
use std::ops::{Add, Mul, Sub};

use log::trace;
use strum::{Display, IntoStaticStr};

use crate::palm::Modifier;

/// A 2D position or displacement.
///
/// Touch positions are normalized to `[0, 1] × [0, 1]`; pointer positions are pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// Touch state reported by the input driver for one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ContactPhase {
    #[strum(serialize = "starting")]
    Starting,
    #[strum(serialize = "active")]
    Active,
    /// In range but not touching the surface.
    #[strum(serialize = "hovering")]
    Hovering,
    #[strum(serialize = "ending")]
    Ending,
}

impl ContactPhase {
    /// Whether a contact in this phase counts towards a gesture.
    pub fn is_touching(self) -> bool {
        matches!(self, ContactPhase::Starting | ContactPhase::Active)
    }
}

/// One finger as delivered by the input collaborator for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawContact {
    pub id: i32,
    pub position: Point,
    /// Normalized units per second.
    pub velocity: Point,
    pub pressure: f64,
    /// Normalized touch-major axis, 0 when the device does not report it.
    pub size: f64,
    pub phase: ContactPhase,
}

/// All contacts reported at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TouchFrame {
    pub contacts: Vec<RawContact>,
    /// Monotonic seconds.
    pub timestamp: f64,
    /// Modifier keys held while this frame was captured.
    pub modifiers: Vec<Modifier>,
}

/// A tracked contact: the last attributes seen for its id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub id: i32,
    pub position: Point,
    pub velocity: Point,
    pub pressure: f64,
    pub size: f64,
    pub phase: ContactPhase,
    pub last_seen_at: f64,
}

impl Contact {
    fn from_raw(raw: &RawContact, timestamp: f64) -> Self {
        Self {
            id: raw.id,
            position: raw.position,
            velocity: raw.velocity,
            pressure: raw.pressure,
            size: raw.size,
            phase: raw.phase,
            last_seen_at: timestamp,
        }
    }
}

/// Maps contact ids to their last known attributes.
///
/// Contacts live exactly as long as they keep appearing in frames; an id
/// missing from a frame is dropped in that same update.
#[derive(Debug, Default)]
pub struct ContactTracker {
    contacts: BTreeMap<i32, Contact>,
}

impl ContactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a frame and return the contacts that are touching the surface.
    pub fn update(&mut self, frame: &TouchFrame) -> Vec<Contact> {
        for raw in &frame.contacts {
            self.contacts
                .insert(raw.id, Contact::from_raw(raw, frame.timestamp));
        }
        self.contacts
            .retain(|id, _| frame.contacts.iter().any(|raw| raw.id == *id));

        trace!(
            "Tracking {} contact(s) at t={:.3}",
            self.contacts.len(),
            frame.timestamp
        );
        self.active()
    }

    /// Touching contacts, ordered by id.
    pub fn active(&self) -> Vec<Contact> {
        self.contacts
            .values()
            .filter(|c| c.phase.is_touching())
            .copied()
            .collect()
    }

    pub fn get(&self, id: i32) -> Option<&Contact> {
        self.contacts.get(&id)
    }

    /// Number of tracked contacts, touching or not.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn reset(&mut self) {
        self.contacts.clear();
    }
}

/// Aggregate of the qualifying contacts for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GestureSnapshot {
    pub centroid: Point,
    pub velocity: Point,
    pub pressure: f64,
    pub active_count: usize,
    /// Stamped by the recognizer while a gesture is in progress.
    pub start_position: Option<Point>,
    pub last_position: Option<Point>,
}

impl GestureSnapshot {
    /// Mean position, velocity and pressure of `contacts`.
    pub fn from_contacts(contacts: &[Contact]) -> Self {
        if contacts.is_empty() {
            return Self::default();
        }

        let n = contacts.len() as f64;
        let (centroid, velocity, pressure) = contacts.iter().fold(
            (Point::ORIGIN, Point::ORIGIN, 0.0),
            |(pos, vel, pressure), c| (pos + c.position, vel + c.velocity, pressure + c.pressure),
        );

        Self {
            centroid: centroid * (1.0 / n),
            velocity: velocity * (1.0 / n),
            pressure: pressure / n,
            active_count: contacts.len(),
            start_position: None,
            last_position: None,
        }
    }
}
