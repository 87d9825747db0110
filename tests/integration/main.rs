// tests/integration/main.rs
#[path = "../common/mod.rs"]
mod common;

mod enrollment_tests;
mod worker_tests;
