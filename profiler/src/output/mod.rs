//! Output formats for sealed event sets

pub mod chrome;
pub mod stacks;
pub mod table;
