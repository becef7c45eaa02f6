pub mod accumulator;
pub mod classify;
pub mod config;
pub mod error;
pub mod frame;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod transport;
pub mod turn;
#[cfg(test)]
pub mod test_util;
