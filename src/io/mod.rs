//! Input files other than predefined grasps

pub mod models;

pub use models::{model_base_name, read_models_file};
