//! conch-osc: shell-reported working directory tracking for Conch.
//!
//! Shells announce their current directory with the OSC7 escape sequence
//! (`ESC ] 7 ; file://host/path BEL`). This crate pulls those announcements
//! out of a raw PTY byte stream and turns them into display-ready state.
//!
//! # Architecture
//!
//! - [`Osc7Parser`] — Streaming state machine over PTY output. Sequences may
//!   arrive split across any number of reads.
//! - [`HostIdentity`] — Decides whether a reported hostname is this machine.
//! - [`DirectoryTracker`] — Per-session [`DirectoryState`] built from
//!   successfully parsed events.

pub mod directory;
pub mod host;
pub mod osc7;

pub use directory::{DirectoryState, DirectoryTracker};
pub use host::HostIdentity;
pub use osc7::{Feed, Osc7Event, Osc7Parser, Osc7Status, ParseError};
