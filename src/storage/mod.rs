// @file: src/storage/mod.rs
// @description: Persistent storage for ingested candles.
// @author: LAS.

pub mod candle_store;
