pub mod create;
pub mod download;
pub mod health;
