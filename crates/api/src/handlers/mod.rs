pub mod cluster;
pub mod health;
pub mod tasks;
