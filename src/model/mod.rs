pub mod repository;
pub mod sshkey;
pub mod template;
pub mod user;
