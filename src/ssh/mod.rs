pub mod command;
pub mod handler;
pub mod service;
