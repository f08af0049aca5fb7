pub mod cancellation;
pub mod config;
pub mod data_context;
pub mod error;
pub mod features;
pub mod indicators;
pub mod labels;
pub mod models;
pub mod predictor;
pub mod regression;
pub mod series;
pub mod synthetic;
pub mod trainer;
pub mod walk_forward;
pub mod weights;

pub mod commands {
    pub mod market_data_snapshot;
    pub mod synthesize;
    pub mod train_global;
    pub mod walk_forward;
}
