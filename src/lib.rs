pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod io;
pub mod mesh;
pub mod pose;
pub mod publish;
pub mod sensor;
pub mod system;
