pub mod config;
pub mod coordinator;
pub mod crawl;
pub mod db;
pub mod filter;
pub mod groups;
pub mod parser;
pub mod pool;
pub mod session;
