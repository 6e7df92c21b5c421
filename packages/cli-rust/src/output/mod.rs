//! Output utilities for CLI commands
//!
//! Spinners for long-running host steps and consistent styling for
//! health, deploy, reconcile and checksum results.

pub mod colors;
pub mod spinner;

pub use colors::{action_style, deploy_style, health_style, verdict_style};
pub use spinner::StepSpinner;
