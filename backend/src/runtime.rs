//! Wires configuration into a ready-to-use engine for both binaries

use crate::{
    config::{DispatchMode, EngineConfig},
    db,
    integrations::{
        DeviceDispatcher, HttpDeviceDispatcher, MqttDeviceDispatcher, ReqwestWebhookSender,
        SmtpEmailTransport, StoreWorkspaceDirectory,
    },
    services::{ActionPipeline, AutomationEngine},
    store::{AutomationRepository, EntityStore, MemoryEntityStore, PgEntityStore},
};
use log::{info, warn};
use std::sync::Arc;

pub struct Runtime {
    pub engine: AutomationEngine,
    /// Present when running against Postgres; used for expiry purges
    pub pg_store: Option<Arc<PgEntityStore>>,
}

impl Runtime {
    pub async fn build(config: &EngineConfig) -> Result<Self, String> {
        let (store, pg_store): (Arc<dyn EntityStore>, Option<Arc<PgEntityStore>>) =
            match &config.database_url {
                Some(url) => {
                    let pg = Arc::new(PgEntityStore::new(db::init_pool(url)?));
                    (pg.clone() as Arc<dyn EntityStore>, Some(pg))
                }
                None => {
                    warn!("DATABASE_URL not set; using the in-memory store (data is lost on exit)");
                    (Arc::new(MemoryEntityStore::new()) as Arc<dyn EntityStore>, None)
                }
            };

        let repository = AutomationRepository::new(store);
        let webhooks = ReqwestWebhookSender::new(config.http_timeout)?;
        let mut pipeline = ActionPipeline::new(
            Arc::new(webhooks),
            Arc::new(StoreWorkspaceDirectory::new(repository.clone())),
        );

        if let Some(dispatcher) = build_dispatcher(config).await? {
            info!("Device dispatch via {}", dispatcher.transport_name());
            pipeline = pipeline.with_device_dispatcher(dispatcher);
        }

        if let Some(smtp) = &config.smtp {
            let transport =
                SmtpEmailTransport::new(smtp, config.http_timeout).map_err(|e| e.to_string())?;
            info!("Email via SMTP relay {}:{}", smtp.host, smtp.port);
            pipeline = pipeline.with_email_transport(Arc::new(transport));
        }

        let engine = AutomationEngine::new(repository, pipeline, Arc::new(config.plans.clone()));
        Ok(Self { engine, pg_store })
    }
}

async fn build_dispatcher(
    config: &EngineConfig,
) -> Result<Option<Arc<dyn DeviceDispatcher>>, String> {
    match &config.dispatch {
        DispatchMode::None => Ok(None),
        DispatchMode::Http { base_url } => {
            let dispatcher = HttpDeviceDispatcher::new(base_url.clone(), config.http_timeout)?;
            Ok(Some(Arc::new(dispatcher)))
        }
        DispatchMode::Mqtt {
            config: mqtt,
            topic_prefix,
        } => {
            let dispatcher = MqttDeviceDispatcher::connect(
                mqtt.clone(),
                topic_prefix.clone(),
                config.http_timeout,
            )
            .await
            .map_err(|e| e.to_string())?;
            Ok(Some(Arc::new(dispatcher)))
        }
    }
}
