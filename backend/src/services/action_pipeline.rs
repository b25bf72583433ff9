use crate::{
    integrations::{
        DeviceCommand, DeviceDispatcher, DispatchError, EmailError, EmailRenderer, EmailTransport,
        TemplateEmailRenderer, WebhookError, WebhookRequest, WebhookSender, WorkspaceDirectory,
    },
    models::{
        ActionConfig, ActionExecutionResult, ActionStatus, EmailAction, TriggerType,
        UpdateDeviceAction, WebhookAction,
    },
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What an automation's actions know about the firing that started them
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    pub automation_id: String,
    pub automation_name: String,
    pub workspace_id: String,
    pub workspace_name: String,
    pub trigger_type: TriggerType,
    pub trigger_data: JsonValue,
    pub fired_at: DateTime<Utc>,
}

impl ActionContext {
    fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Error raised by a single action; it never escapes the pipeline
#[derive(Debug, Clone)]
pub enum ActionError {
    Webhook(WebhookError),
    Dispatch(DispatchError),
    Email(EmailError),
    Panicked(String),
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::Webhook(e) => write!(f, "{}", e),
            ActionError::Dispatch(e) => write!(f, "{}", e),
            ActionError::Email(e) => write!(f, "{}", e),
            ActionError::Panicked(msg) => write!(f, "Action aborted unexpectedly: {}", msg),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<WebhookError> for ActionError {
    fn from(err: WebhookError) -> Self {
        ActionError::Webhook(err)
    }
}

impl From<DispatchError> for ActionError {
    fn from(err: DispatchError) -> Self {
        ActionError::Dispatch(err)
    }
}

impl From<EmailError> for ActionError {
    fn from(err: EmailError) -> Self {
        ActionError::Email(err)
    }
}

/// Runs an automation's actions in order, one result per action
#[derive(Clone)]
pub struct ActionPipeline {
    webhooks: Arc<dyn WebhookSender>,
    workspaces: Arc<dyn WorkspaceDirectory>,
    devices: Option<Arc<dyn DeviceDispatcher>>,
    email_renderer: Arc<dyn EmailRenderer>,
    email_transport: Option<Arc<dyn EmailTransport>>,
}

impl ActionPipeline {
    pub fn new(webhooks: Arc<dyn WebhookSender>, workspaces: Arc<dyn WorkspaceDirectory>) -> Self {
        Self {
            webhooks,
            workspaces,
            devices: None,
            email_renderer: Arc::new(TemplateEmailRenderer::new()),
            email_transport: None,
        }
    }

    pub fn with_device_dispatcher(mut self, dispatcher: Arc<dyn DeviceDispatcher>) -> Self {
        self.devices = Some(dispatcher);
        self
    }

    pub fn with_email_renderer(mut self, renderer: Arc<dyn EmailRenderer>) -> Self {
        self.email_renderer = renderer;
        self
    }

    pub fn with_email_transport(mut self, transport: Arc<dyn EmailTransport>) -> Self {
        self.email_transport = Some(transport);
        self
    }

    /// Execute every action, in order, regardless of earlier failures.
    /// The returned list always has one entry per input action.
    pub async fn execute(
        &self,
        actions: &[ActionConfig],
        mut context: ActionContext,
    ) -> Vec<ActionExecutionResult> {
        context.workspace_name = self.resolve_workspace_name(&context.workspace_id).await;
        let context = Arc::new(context);

        let mut results = Vec::with_capacity(actions.len());
        for (action_index, action) in actions.iter().enumerate() {
            let started = Instant::now();

            if let Some(delay) = action.pre_delay() {
                tokio::time::sleep(delay).await;
            }

            let outcome = self.run_isolated(action.clone(), context.clone()).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let (status, error) = match outcome {
                Ok(()) => (ActionStatus::Success, None),
                Err(e) => {
                    warn!(
                        "Automation {} action #{} ({}) failed: {}",
                        context.automation_id,
                        action_index,
                        action.action_type(),
                        e
                    );
                    (ActionStatus::Failure, Some(e.to_string()))
                }
            };

            results.push(ActionExecutionResult {
                action_index,
                action_type: action.action_type().to_string(),
                status,
                error,
                duration_ms,
            });
        }

        results
    }

    /// Best effort; the bare id stands in when the lookup fails
    async fn resolve_workspace_name(&self, workspace_id: &str) -> String {
        match self.workspaces.workspace(workspace_id).await {
            Ok(Some(workspace)) => workspace.name,
            Ok(None) => workspace_id.to_string(),
            Err(e) => {
                warn!("Could not resolve workspace {} name: {}", workspace_id, e);
                workspace_id.to_string()
            }
        }
    }

    /// Run one action on its own task so even a panic becomes a failure result
    async fn run_isolated(
        &self,
        action: ActionConfig,
        context: Arc<ActionContext>,
    ) -> Result<(), ActionError> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run_action(&action, &context).await })
            .await
            .unwrap_or_else(|join_err| Err(ActionError::Panicked(join_err.to_string())))
    }

    async fn run_action(
        &self,
        action: &ActionConfig,
        context: &ActionContext,
    ) -> Result<(), ActionError> {
        match action {
            ActionConfig::Log(log_action) => {
                info!(
                    target: "automation::action",
                    "[{} / {}] {}",
                    context.workspace_name, context.automation_id, log_action.message
                );
                Ok(())
            }
            ActionConfig::SendWebhook(webhook) => self.send_webhook(webhook, context).await,
            ActionConfig::UpdateDevice(update) => self.update_device(update, context).await,
            ActionConfig::SendEmail(email) => self.send_email(email, context).await,
            ActionConfig::Delay(delay) => {
                tokio::time::sleep(Duration::from_secs(delay.delay_seconds)).await;
                Ok(())
            }
        }
    }

    async fn send_webhook(
        &self,
        webhook: &WebhookAction,
        context: &ActionContext,
    ) -> Result<(), ActionError> {
        let request = build_webhook_request(webhook, context);
        self.webhooks.send(&request).await?;
        Ok(())
    }

    async fn update_device(
        &self,
        update: &UpdateDeviceAction,
        context: &ActionContext,
    ) -> Result<(), ActionError> {
        let dispatcher = self.devices.as_ref().ok_or(DispatchError::Unavailable)?;
        let endpoint = dispatcher
            .resolve(&context.workspace_id, &update.target_device_id)
            .await?;
        let command =
            DeviceCommand::set_field(&update.field, update.value.clone(), context.to_json());
        dispatcher.deliver(&endpoint, &command).await?;
        Ok(())
    }

    async fn send_email(
        &self,
        email: &EmailAction,
        context: &ActionContext,
    ) -> Result<(), ActionError> {
        let rendered = self
            .email_renderer
            .render(&email.subject, &email.body, &context.to_json())?;
        let transport = self.email_transport.as_ref().ok_or(EmailError::NotConfigured)?;
        transport
            .send(&email.to, &rendered.subject, &rendered.html, &rendered.text)
            .await?;
        Ok(())
    }
}

/// Method defaults to POST; GET carries no body. The JSON body is the
/// action context overlaid with the template's own keys; a non-object
/// template is sent under `"template"`.
pub fn build_webhook_request(webhook: &WebhookAction, context: &ActionContext) -> WebhookRequest {
    let method = webhook
        .method
        .as_deref()
        .map(|m| m.trim().to_ascii_uppercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "POST".to_string());

    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    for (name, value) in &webhook.headers {
        // Header names are case-insensitive; configured ones replace defaults
        headers.retain(|existing: &String, _| !existing.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), value.clone());
    }

    let body = if method == "GET" {
        None
    } else {
        let mut body = match context.to_json() {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        match &webhook.body_template {
            Some(JsonValue::Object(template)) => {
                for (key, value) in template {
                    body.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                body.insert("template".to_string(), other.clone());
            }
            None => {}
        }
        Some(JsonValue::Object(body))
    };

    WebhookRequest {
        url: webhook.url.clone(),
        method,
        headers,
        body,
    }
}
