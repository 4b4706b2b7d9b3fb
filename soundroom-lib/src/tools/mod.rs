//! Small shared helpers.

pub mod timer;
