pub mod client;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod logging;
pub mod model;
pub mod render;
pub mod sensors;
pub mod sequences;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod utils;
pub mod wire;
