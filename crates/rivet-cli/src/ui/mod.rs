//! Terminal output.

pub mod reporter;
pub mod table;
pub mod theme;
