use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};

use whisper_at_api::config_loader;
use whisper_at_api::handlers::{api_status, health, root, transcribe};
use whisper_at_api::{ApiConfig, EngineConfig, JobDispatcher, Readiness, SpeechEngine, WhisperAtEngine};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // Load configurations: file seeds env vars, env vars win
    config_loader::load_config();
    let api_config = ApiConfig::default();
    let engine_config = EngineConfig::default();

    if let Err(e) = api_config.validate() {
        error!("{}", e);
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            e.to_string(),
        ));
    }

    // Create tmp directory if it doesn't exist
    if let Err(e) = api_config.ensure_temp_dir() {
        warn!(
            "Failed to create temp directory {}: {}",
            api_config.temp_dir, e
        );
    }

    let readiness = Readiness::new();
    let dispatcher = JobDispatcher::new(api_config.queue_capacity);

    // Load the model instances in the background. The server starts
    // accepting connections immediately and answers 503 until every
    // instance confirmed its load; queue consumers attach only after that,
    // so no job can run against a half-loaded model.
    {
        let readiness = readiness.clone();
        let dispatcher = Arc::clone(&dispatcher);
        let engine_config = engine_config.clone();
        let instances = api_config.model_instances;
        tokio::spawn(async move {
            let mut engines: Vec<Arc<dyn SpeechEngine>> = Vec::with_capacity(instances);
            for index in 0..instances {
                match WhisperAtEngine::load(&engine_config, index).await {
                    Ok(engine) => engines.push(Arc::new(engine)),
                    Err(e) => {
                        error!("Model instance {} failed to load: {}", index, e);
                        std::process::exit(1);
                    }
                }
            }
            dispatcher.start(engines);
            readiness.mark_ready();
            info!("All {} model instance(s) loaded", instances);
        });
    }

    let bind_addr = format!("{}:{}", api_config.host, api_config.port);
    let timeout = Duration::from_secs(api_config.request_timeout);
    let keep_alive = Duration::from_secs(api_config.keep_alive);
    let http_workers = api_config.http_workers;

    info!("Starting Whisper-AT API server on http://{}", bind_addr);
    info!("Using temp directory: {}", api_config.temp_dir);
    info!(
        "Queue capacity: {}, model instances: {}",
        api_config.queue_capacity, api_config.model_instances
    );
    info!(
        "Runner command: {}, model: {}, device: {}",
        engine_config.runner_cmd, engine_config.model, engine_config.device
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(Arc::clone(&dispatcher)))
            .app_data(web::Data::new(readiness.clone()))
            .app_data(web::Data::new(api_config.clone()))
            .service(transcribe)
            .service(health)
            .service(api_status)
            .service(root)
    })
    .bind(bind_addr)?
    .client_disconnect_timeout(timeout)
    .keep_alive(keep_alive)
    .workers(http_workers)
    .run()
    .await
}
