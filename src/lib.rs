pub mod config;
pub mod decision;
pub mod execution;
pub mod features;
pub mod feed;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod predictor;
pub mod risk;
pub mod signals;
