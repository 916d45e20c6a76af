pub mod agent;
pub mod base;
pub mod sse;
pub mod standard;
pub mod utils;

#[cfg(test)]
pub mod mock;
