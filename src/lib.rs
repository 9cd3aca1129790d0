//! tridrag – three-finger drag for Linux multitouch devices.
//!
//! Raw multitouch frames go through [`contact::ContactTracker`], the
//! [`palm`] filter and [`recognizer::GestureRecognizer`]; recognized drags are
//! smoothed by [`shaper::MotionShaper`] and turned into pointer commands by
//! [`sink::PointerActions`]. [`engine::GestureEngine`] runs the pipeline on
//! its own threads.

pub mod config;
pub mod contact;
pub mod engine;
pub mod event;
pub mod manager;
pub mod palm;
pub mod recognizer;
pub mod shaper;
pub mod sink;
pub mod uinput;
