//! Coal Pile Measurement
//!
//! This library provides the core of the coal-pile-measure system: an
//! asynchronous two-stage pipeline that reconstructs a textured mesh from a
//! photo/video capture with an external photogrammetry tool, then derives the
//! pile's volume, bounding dimensions and estimated mass.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
