// Library for tests to access modules

pub mod config;
pub mod extract;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod poster;
pub mod routes;
pub mod server;
pub mod source;
pub mod version;
pub mod watcher;
