pub mod aggregate;
pub mod application;
pub mod auth;
pub mod backend;
pub mod cache;
pub mod configuration;
pub mod dav;
pub mod init;
pub mod normalized_path;
pub mod repository;
