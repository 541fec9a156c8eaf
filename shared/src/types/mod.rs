//! Core data types shared across the profiler components

pub mod event;
pub mod summary;
