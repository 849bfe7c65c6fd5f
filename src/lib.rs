//! OtaDeploy - Firmware release pipeline and OTA distribution endpoint
//!
//! `engine::pipeline` takes a firmware build to a signed, published and recorded
//! release. `engine::distribution` serves released images to devices.

pub mod engine;
