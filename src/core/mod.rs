pub mod config;
pub mod error;
pub mod io;
pub mod registry;
pub mod script;
pub mod state;
