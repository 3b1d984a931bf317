pub mod checker;
pub mod config;
pub mod engine;
pub mod init;
pub mod logger;
pub mod pipeline;
pub mod resolver;
pub mod sources;
pub mod stats;
pub mod store;
