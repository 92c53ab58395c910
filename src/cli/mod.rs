//! Interactive command-line surface

pub mod commands;

pub use commands::App;
