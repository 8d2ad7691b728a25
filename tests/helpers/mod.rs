#![allow(dead_code)]

pub mod app;
pub mod duplicating_bus;
pub mod fixtures;
