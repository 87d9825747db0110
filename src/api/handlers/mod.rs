// src/api/handlers/mod.rs
pub mod faceapi;
