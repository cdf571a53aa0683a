pub mod cli;
pub mod collisions;
pub mod config;
pub mod economy;
pub mod geometry;
pub mod lands;
pub mod permissions;
pub mod persistence;
pub mod players;
pub mod wire;
