// @file: src/core/mod.rs
// @description: Exports domain models, errors, the exchange interface and the ingestor.
// @author: LAS.

pub mod models;
pub mod errors;
pub mod interfaces;
pub mod ingestor;
