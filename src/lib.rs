pub mod error;
pub mod config;
pub mod pkt_line;
pub mod service;
pub mod model;
pub mod token;
pub mod extapi;
pub mod access;
pub mod auth;
pub mod maintenance;
pub mod stream;
pub mod repository;
pub mod serve;
pub mod http;
pub mod ssh;
