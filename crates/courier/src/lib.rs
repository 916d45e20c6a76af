pub mod config;
pub mod context;
pub mod conversation;
pub mod dispatcher;
pub mod errors;
pub mod history;
pub mod models;
pub mod normalizer;
pub mod providers;
pub mod registry;
pub mod utils;
