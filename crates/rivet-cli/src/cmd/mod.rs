pub mod common;
pub mod create;
pub mod export;
pub mod graph;
pub mod install;
pub mod list;
pub mod lock;
