//! Continuous per-camera recording into rotating segment files.

mod schedule;
mod worker;

#[cfg(test)]
mod tests;

pub use schedule::rollover_deadline;
pub use worker::{RecorderServices, RecorderSettings, RecorderWorker};
