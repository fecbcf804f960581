//! Waypoint: a distributed scraping control plane.
//!
//! A manager assigns geographically parameterized scraping jobs to a fleet
//! of workers over a persistent job queue, recovers from worker loss, and
//! aggregates results into Postgres. Workers lean on a shared dedupe set
//! and a self-feeding SOCKS5 proxy gateway while scraping.

pub mod agent;
pub mod cache;
pub mod config;
pub mod db;
pub mod dedupe;
pub mod dispatch;
pub mod error;
pub mod grid;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod proxy;
pub mod services;
pub mod spawner;
pub mod state;
pub mod web;
