pub mod codes;
pub mod normalizer;
pub mod orchestrator;
pub mod overlap;
pub mod recognition;
pub mod webhook;
