use actix_cors::Cors;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};

use automation_core::api;
use automation_core::config::EngineConfig;
use automation_core::runtime::Runtime;

#[get("/")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "Automation Core",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = EngineConfig::from_env().map_err(|e| std::io::Error::other(e.to_string()))?;
    let runtime = Runtime::build(&config).await.map_err(std::io::Error::other)?;
    let engine = runtime.engine;

    log::info!("Starting Automation Core at http://{}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(engine.clone()))
            .service(health_check)
            .configure(api::config)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
}
