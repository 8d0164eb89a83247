//! surface-monitor: Attack surface monitoring over repeated nmap scans.
//!
//! Runs nmap against configured targets, compares every scan with the
//! previous one, scores exposed services, and keeps per-port history in
//! SQLite along with a sealed JSON report per scan.

pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod nmap_xml;
pub mod persist;
pub mod pipeline;
pub mod risk;
pub mod scanner;
pub mod scheduler;
pub mod target;
