//! apploy operator: reconciles `Apps` resources into cluster workloads

pub mod client;
pub mod config;
pub mod controller;
