//! Live view workers: one per camera, reconnecting with bounded retries.

mod worker;

#[cfg(test)]
mod tests;

pub use worker::StreamWorker;
