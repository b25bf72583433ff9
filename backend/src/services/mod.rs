pub mod action_pipeline;
pub mod automation_engine;
pub mod condition;
pub mod condition_gate;
pub mod cron;
pub mod execution_recorder;
pub mod loop_advisor;
pub mod trigger_matcher;

pub use action_pipeline::{ActionContext, ActionPipeline};
pub use automation_engine::{AutomationEngine, AutomationRun, SaveAutomationError};
pub use cron::CronEngine;
pub use execution_recorder::ExecutionRecorder;
pub use loop_advisor::validate_automation_graph;
pub use trigger_matcher::TriggerMatcher;
