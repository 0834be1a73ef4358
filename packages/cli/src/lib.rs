// ABOUTME: Library half of the kiln binary
// ABOUTME: Exposes the application wiring so it can be driven from tests

pub mod app;

pub use app::{App, Generation};
