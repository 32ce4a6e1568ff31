pub mod baseline;
pub mod block;
pub mod bus;
pub mod config;
pub mod driver;
pub mod entity;
pub mod error;
pub mod events;
pub mod feed;
pub mod indicators;
pub mod load;
pub mod logging;
pub mod market;
pub mod memory;
pub mod metrics;
pub mod plugin;
pub mod resonance;
pub mod simulation;
pub mod storage;
pub mod symbols;
