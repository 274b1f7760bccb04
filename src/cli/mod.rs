//! CLI-specific utilities for ahn-dl
//!
//! Code used only by the command-line front end, kept apart from the library.

pub mod progress;

pub use progress::ProgressManager;
