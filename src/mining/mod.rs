//! Grasp search

pub mod miner;
pub mod strategy;

pub use miner::{GraspMiner, MinerConfig, MinerConfigBuilder, MiningReport};
