//! Command implementations for the layscan CLI.

pub mod assemble;
pub mod extract;
pub mod fetch;
pub mod scan;
