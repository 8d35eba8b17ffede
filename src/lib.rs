// @file: src/lib.rs
// @description: Exposes the ingestion modules for the binary and for tests.
// @author: LAS.


pub mod core;
pub mod connectors;
pub mod storage;
pub mod utils;
mod tests;
