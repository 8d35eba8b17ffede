// @file: src/tests/mod.rs
// @description: Cross-module test suites and the scripted exchange they share.
// @author: LAS.


mod ingestion_scenarios;
