//! Capability domain module
//!
//! Describes what backends can do and how the merged namespace answers
//! "who owns this name / URI".
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ CapabilitySet│───▶│   Catalog    │───▶│ ToolDescriptor│
//! │ (per backend)│    │ (merged,     │    │ ResolvedRes.  │
//! └──────────────┘    │  immutable)  │    └──────────────┘
//!                     └──────────────┘
//! ```
//!
//! - [`descriptor`]: tool, resource and prompt descriptors
//! - [`qualified`]: `backend.name` identifiers
//! - [`uri_template`]: resource URI templates and specificity
//! - [`catalog`]: merged snapshot with the collision policy
//! - [`validation`]: argument validation trait

pub mod catalog;
pub mod descriptor;
pub mod qualified;
pub mod uri_template;
pub mod validation;
