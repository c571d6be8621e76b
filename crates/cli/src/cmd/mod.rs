//! Command implementations

pub mod backup;
pub mod fetch;
pub mod rebuild;
pub mod replay;
pub mod status;
