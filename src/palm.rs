//! Palm rejection: drops contacts that should not count as fingers.
use strum::{Display, EnumString, IntoStaticStr};

use crate::config::{TridragError, non_negative};
use crate::contact::Contact;

/// Keyboard modifier that can be required while gesturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum Modifier {
    #[strum(serialize = "shift")]
    Shift,
    #[strum(to_string = "control", serialize = "ctrl")]
    Control,
    #[strum(serialize = "alt")]
    Alt,
    #[strum(to_string = "super", serialize = "meta")]
    Super,
}

/// Per-contact filters applied to the active set before fingers are counted.
///
/// A zero size disables the corresponding filter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PalmRejection {
    /// Height of the band along the bottom edge (normalized, y grows downward)
    /// in which contacts are ignored.
    pub exclusion_zone: f64,
    /// Contacts with a larger normalized touch-major are treated as palms.
    pub max_contact_size: f64,
    /// When set, no contact qualifies unless this modifier is held.
    pub required_modifier: Option<Modifier>,
}

impl PalmRejection {
    pub fn is_enabled(&self) -> bool {
        self.exclusion_zone > 0.0 || self.max_contact_size > 0.0 || self.required_modifier.is_some()
    }

    /// Whether `contact` passes every enabled filter.
    pub fn admits(&self, contact: &Contact, held: &[Modifier]) -> bool {
        if self.required_modifier.is_some_and(|m| !held.contains(&m)) {
            return false;
        }
        if self.exclusion_zone > 0.0 && contact.position.y > 1.0 - self.exclusion_zone {
            return false;
        }
        if self.max_contact_size > 0.0 && contact.size > self.max_contact_size {
            return false;
        }
        true
    }

    pub fn filter(&self, contacts: Vec<Contact>, held: &[Modifier]) -> Vec<Contact> {
        if !self.is_enabled() {
            return contacts;
        }
        contacts
            .into_iter()
            .filter(|c| self.admits(c, held))
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), TridragError> {
        non_negative("palm_exclusion_zone", self.exclusion_zone)?;
        if self.exclusion_zone >= 1.0 {
            return Err(TridragError::invalid(
                "palm_exclusion_zone",
                "must leave part of the surface usable (< 1.0)",
            ));
        }
        non_negative("palm_max_contact_size", self.max_contact_size)
    }
}
