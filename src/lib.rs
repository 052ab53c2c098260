//! Core of a personal finance tracker: cached market data and an aggregation
//! pipeline over expense records.

pub mod cache;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod market;
