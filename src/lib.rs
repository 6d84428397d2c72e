// Public API - only expose the runner module
pub mod runner;

// Internal modules - organized by subsystem
mod config;
mod coordination;
mod error;
mod formats;
mod io;
mod mining;
mod session;
mod telemetry;

#[cfg(test)]
mod integ_tests;
