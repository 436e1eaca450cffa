//! Deterministic artistic image rendering.
//!
//! This library provides the rendering pipelines (Pop Poster, Pencil Sketch,
//! Between The Lines), their versioned registry, the render job state
//! machine, and the worker-side executor that drives jobs from the queue to
//! a terminal state against PostgreSQL, Redis and S3-compatible storage.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipelines;
pub mod routes;
pub mod services;
