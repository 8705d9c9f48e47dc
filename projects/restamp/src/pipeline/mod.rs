// Restamping pipeline: clock recovery, repair, pairing and scoring

pub mod metrics;
pub mod orchestrator;
pub mod recovery;
pub mod repair;
pub mod roles;
pub mod scoring;
pub mod types;
