pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod detect;
pub mod engine;
pub mod exit;
pub mod fix;
pub mod grouping;
pub mod logs;
pub mod parser;
pub mod platform;
pub mod registry;
pub mod ui;
