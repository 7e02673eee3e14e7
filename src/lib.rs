//! snaut - headless Spectronaut batch runner
//!
//! Prepares instrument data files (unpacking zipped Bruker .d folders in
//! parallel), writes the condition table, and drives SpectronautCMD through
//! its activate / search / deactivate sequence with streamed output,
//! timeouts and guaranteed subprocess teardown on cancellation.

pub mod condition;
pub mod config;
pub mod datafiles;
pub mod error;
pub mod extract;
pub mod operation;
pub mod process;
pub mod progress;
pub mod runner;
pub mod tool;
pub mod workflow;
