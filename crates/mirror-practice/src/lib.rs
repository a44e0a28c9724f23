//! mirror-practice — Host for the Emotion Practice game.
//!
//! Feeds camera frames to the emotion pipeline on a worker thread and turns
//! its predictions into target-emotion feedback.

pub mod config;
pub mod engine;
pub mod feedback;

pub use config::{Config, ConfigError};
pub use engine::{load_engine, spawn_engine, EngineError, EngineHandle, Prediction, Submission};
pub use feedback::{Feedback, Observation, PracticeSession};
