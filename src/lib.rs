pub mod aggregate;
pub mod bibtex;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod figshare;
pub mod output;
pub mod providers;
pub mod resolver;
pub mod similarity;
pub mod stats;
pub mod store;
