//! Classify images and live webcam streams with a pretrained MobileNet model.
pub mod annotate;
pub mod data_socket;
pub mod endpoints;
pub mod gallery;
pub mod inferer;
pub mod meter;
pub mod model;
pub mod nn;
pub mod page;
pub mod pubsub;
pub mod utils;
