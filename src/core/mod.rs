// src/core/mod.rs
pub mod engine;
pub mod face;
pub mod node;
pub mod services;
