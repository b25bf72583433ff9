//! Automation Core Library
//!
//! Event-driven automation rule engine:
//! - Trigger matching for device data, device status and cron schedules
//! - Condition groups evaluated against stored device snapshots
//! - Ordered action pipelines (log, webhook, device update, email, delay)
//! - Execution logs with plan-based retention and rolling statistics
//! - Advisory feedback-loop detection across a workspace's rules

pub mod api;
pub mod config;
pub mod db;
pub mod integrations;
pub mod models;
pub mod runtime;
pub mod schema;
pub mod services;
pub mod store;
