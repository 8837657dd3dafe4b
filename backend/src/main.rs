mod auth;
mod config;
mod db;
mod pipeline;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use std::env;
use std::sync::Arc;

use auth::jwt::JwtService;
use auth::middleware::AuthMiddleware;
use config::PipelineConfig;
use db::models::ModelVersionRecord;
use db::repository::DiagnosisRepository;
use pipeline::diagnose::DiagnosisService;
use pipeline::inference::{DecisionThresholds, InferenceService};
use pipeline::preprocess::ImagePreprocessor;
use pipeline::registry::{ModelMeta, ModelRegistry};
use routes::configure_routes;
use storage::image_store::ImageStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let pipeline_config = PipelineConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load pipeline config, using defaults: {}", e);
        PipelineConfig::default()
    });

    let model_path =
        env::var("MODEL_PATH").unwrap_or_else(|_| "models/pneumonia_mobilenetv2.pt".to_string());
    let model_meta = ModelMeta {
        name: env::var("MODEL_NAME").unwrap_or_else(|_| "pneumonia-mobilenetv2".to_string()),
        version: env::var("MODEL_VERSION").unwrap_or_else(|_| "1.0".to_string()),
        input_size: format!(
            "{}x{}",
            pipeline_config.image.size, pipeline_config.image.size
        ),
    };

    let registry = Arc::new(ModelRegistry::new(&model_path, model_meta));
    if let Err(e) = registry.load() {
        log::error!("Failed to preload model at startup: {}", e);
        return Err(std::io::Error::other(format!("Model loading failed: {e}")));
    }

    // Initialize AWS configuration
    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let dynamodb_client = DynamoDbClient::new(&aws_config);
    let s3_client = S3Client::new(&aws_config);

    // Get table names from environment
    let users_table = env::var("DYNAMODB_USERS_TABLE").unwrap().to_string();
    let images_table = env::var("DYNAMODB_IMAGES_TABLE").unwrap().to_string();
    let predictions_table = env::var("DYNAMODB_PREDICTIONS_TABLE").unwrap().to_string();
    let activity_table = env::var("DYNAMODB_ACTIVITY_TABLE").unwrap().to_string();
    let models_table = env::var("DYNAMODB_MODELS_TABLE").unwrap().to_string();
    let s3_bucket = env::var("S3_BUCKET_NAME").unwrap().to_string();

    let db_repo = DiagnosisRepository::new(
        dynamodb_client,
        users_table,
        images_table,
        predictions_table,
        activity_table,
        models_table,
    );
    let image_store = ImageStore::new(s3_client, s3_bucket);

    // Record the deployed artifact as the active model version
    let version_record = ModelVersionRecord::new(
        registry.meta().name.clone(),
        registry.meta().version.clone(),
        model_path.clone(),
        registry.meta().input_size.clone(),
    );
    if let Err(e) = db_repo.activate_model_version(&version_record).await {
        log::warn!("Failed to register model version: {:?}", e);
    }

    let preprocessor = ImagePreprocessor::new(&pipeline_config);
    let inference = InferenceService::new(
        registry.clone(),
        DecisionThresholds::from(&pipeline_config.classification),
    );
    let diagnosis_service = DiagnosisService::new(
        preprocessor,
        inference,
        db_repo.clone(),
        image_store.clone(),
    );

    let jwt_secret = env::var("JWT_SECRET").unwrap().to_string();
    let jwt_service = JwtService::new(&jwt_secret);
    let auth_middleware = AuthMiddleware::new(jwt_service.clone());

    let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());
    let bind_address = format!("0.0.0.0:{}", port);

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        // CORS is registered last so it sits outside the auth check and
        // preflight requests never need a token
        App::new()
            .wrap(auth_middleware.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::from(registry.clone()))
            .app_data(web::Data::new(diagnosis_service.clone()))
            .app_data(web::Data::new(db_repo.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
