//! Static check for rules that may feed each other
//!
//! Flags rule pairs where one rule's `update_device` action writes to a
//! device another rule's `device_data` trigger watches. Single hop only:
//! multi-rule cycles and a rule that re-triggers itself are not reported,
//! and field values are not simulated. The output is advisory.

use crate::models::{ActionConfig, Automation, TriggerConfig};
use std::collections::HashMap;

pub fn validate_automation_graph(automations: &[Automation]) -> Vec<String> {
    let mut watchers: HashMap<&str, Vec<&Automation>> = HashMap::new();
    for automation in automations {
        if let TriggerConfig::DeviceData(trigger) = &automation.trigger_config {
            watchers
                .entry(trigger.device_id.as_str())
                .or_default()
                .push(automation);
        }
    }

    let mut warnings = Vec::new();
    for automation in automations {
        for action in &automation.actions {
            let ActionConfig::UpdateDevice(update) = action else {
                continue;
            };
            let Some(triggered) = watchers.get(update.target_device_id.as_str()) else {
                continue;
            };
            for other in triggered
                .iter()
                .filter(|other| other.automation_id != automation.automation_id)
            {
                warnings.push(format!(
                    "Automation '{}' ({}) updates device '{}', which triggers automation '{}' ({}); this may cause a feedback loop",
                    automation.name,
                    automation.automation_id,
                    update.target_device_id,
                    other.name,
                    other.automation_id
                ));
            }
        }
    }

    warnings
}
