pub mod bot;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod keyboard;
pub mod memory;
pub mod model;
pub mod processor;
pub mod ratelimit;
pub mod server;
pub mod state;
pub mod telegram;
pub mod util;
