//! Shelfwatch - retail shelf intelligence collection pipeline.
//!
//! Collects product listings and detail-page data (price, rank, reviews,
//! specs) from retailer catalogs on a recurring schedule, normalizing
//! results into a shared relational schema for downstream analytics.

pub mod antibot;
pub mod browser;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod extract;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod repository;
pub mod retailers;
pub mod session;
pub mod utils;
