pub mod annotation;
pub mod background_model;
pub mod blob_extractor;
pub mod calibrator;
pub mod frame;
pub mod metrics;
pub mod trajectory;
pub mod video_sink;
