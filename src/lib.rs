//! Hunyuan 3D Studio: a thin proxy in front of a RunPod-hosted Hunyuan 3D
//! worker and the R2 bucket it writes models to.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod poller;
pub mod routes;
pub mod runpod;
pub mod storage;
