use actix_multipart::Multipart;
use actix_web::{Error, HttpRequest, HttpResponse, web};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::middleware::AuthenticatedUser;
use crate::auth::routes as auth_routes;
use crate::db::repository::DiagnosisRepository;
use crate::pipeline::diagnose::{DiagnosisError, DiagnosisFilter, DiagnosisService};
use crate::pipeline::inference::InferenceError;
use crate::pipeline::registry::ModelRegistry;
use shared::{ConfidenceLevel, DiagnosisListResponse, Label, ModelInfo};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/auth/register").route(web::post().to(auth_routes::register)))
        .service(web::resource("/auth/login").route(web::post().to(auth_routes::login)))
        .service(web::resource("/auth/logout").route(web::post().to(auth_routes::logout)))
        .service(web::resource("/auth/me").route(web::get().to(auth_routes::me)))
        .service(
            web::resource("/api/diagnoses")
                .route(web::post().to(create_diagnosis))
                .route(web::get().to(list_diagnoses)),
        )
        .service(web::resource("/api/diagnoses/statistics").route(web::get().to(statistics)))
        .service(
            web::resource("/api/diagnoses/{id}")
                .route(web::get().to(get_diagnosis))
                .route(web::delete().to(delete_diagnosis)),
        )
        .service(web::resource("/api/history").route(web::get().to(history)))
        .service(web::resource("/api/history/summary").route(web::get().to(history_summary)))
        .service(web::resource("/api/model").route(web::get().to(model_info)))
        .service(web::resource("/api/model/reload").route(web::post().to(model_reload)));
}

pub fn client_ip(req: &HttpRequest) -> Option<String> {
    req.connection_info()
        .realip_remote_addr()
        .map(|addr| addr.to_string())
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"status": "ok"}))
}

fn diagnosis_error_response(err: &DiagnosisError) -> HttpResponse {
    match err {
        DiagnosisError::Validation(e) => {
            info!("rejected upload: {}", e);
            HttpResponse::BadRequest().json(json!({"error": e.to_string()}))
        }
        DiagnosisError::Inference(InferenceError::ModelUnavailable(source)) => {
            error!("diagnosis refused, model unavailable: {}", source);
            HttpResponse::ServiceUnavailable()
                .json(json!({"error": "Model unavailable. Please contact the operator."}))
        }
        DiagnosisError::Inference(e) => {
            error!("inference failed: {}", e);
            HttpResponse::InternalServerError().json(json!({"error": "Inference failed"}))
        }
        DiagnosisError::Storage(e) => {
            error!("image storage failed: {}", e);
            HttpResponse::InternalServerError().json(json!({"error": "Failed to store image"}))
        }
        DiagnosisError::Persistence(e) => {
            error!("persistence failed after inference: {}", e);
            HttpResponse::InternalServerError()
                .json(json!({"error": "Diagnosis was computed but could not be saved"}))
        }
        DiagnosisError::NotFound => {
            HttpResponse::NotFound().json(json!({"error": "Result not found"}))
        }
    }
}

async fn create_diagnosis(
    req: HttpRequest,
    user: AuthenticatedUser,
    mut payload: Multipart,
    diagnosis: web::Data<DiagnosisService>,
) -> Result<HttpResponse, Error> {
    let mut image_data: Vec<u8> = Vec::new();
    let mut file_name = String::new();

    while let Ok(Some(mut field)) = payload.try_next().await {
        let field_file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let bytes = chunk?;
            data.write_all(&bytes)?;
        }

        if let Some(name) = field_file_name {
            if !data.is_empty() {
                file_name = name;
                image_data = data;
            }
        }
    }

    if image_data.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": "No image file provided. Please select an X-ray image."
        })));
    }

    match diagnosis
        .diagnose(user.0, &file_name, &image_data, client_ip(&req))
        .await
    {
        Ok(response) => Ok(HttpResponse::Created().json(response)),
        Err(e) => Ok(diagnosis_error_response(&e)),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    label: Option<String>,
    confidence_level: Option<String>,
    from: Option<String>,
    to: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
}

fn parse_filter(query: &ListQuery) -> Result<DiagnosisFilter, String> {
    let label = match &query.label {
        Some(raw) => {
            Some(Label::from_str(raw).map_err(|_| format!("Invalid label filter: {}", raw))?)
        }
        None => None,
    };
    let confidence_level = match &query.confidence_level {
        Some(raw) => Some(
            ConfidenceLevel::from_str(raw)
                .map_err(|_| format!("Invalid confidence level filter: {}", raw))?,
        ),
        None => None,
    };
    let from = match &query.from {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| format!("Invalid 'from' timestamp: {}", raw))?
                .with_timezone(&Utc),
        ),
        None => None,
    };
    let to = match &query.to {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| format!("Invalid 'to' timestamp: {}", raw))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(DiagnosisFilter {
        label,
        confidence_level,
        from,
        to,
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(20),
    })
}

async fn list_diagnoses(
    user: AuthenticatedUser,
    query: web::Query<ListQuery>,
    diagnosis: web::Data<DiagnosisService>,
) -> HttpResponse {
    let filter = match parse_filter(&query) {
        Ok(filter) => filter,
        Err(message) => return HttpResponse::BadRequest().json(json!({"error": message})),
    };

    match diagnosis.list_diagnoses(user.0, &filter).await {
        Ok((items, total)) => HttpResponse::Ok().json(DiagnosisListResponse {
            items,
            page: filter.page.max(1),
            page_size: filter.page_size.clamp(1, 100),
            total,
        }),
        Err(e) => diagnosis_error_response(&e),
    }
}

async fn get_diagnosis(
    req: HttpRequest,
    user: AuthenticatedUser,
    path: web::Path<String>,
    diagnosis: web::Data<DiagnosisService>,
) -> HttpResponse {
    let prediction_id = match Uuid::parse_str(&path.into_inner()) {
        Ok(id) => id,
        Err(_) => return HttpResponse::BadRequest().body("Invalid UUID format"),
    };

    match diagnosis
        .get_diagnosis(user.0, prediction_id, client_ip(&req))
        .await
    {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => diagnosis_error_response(&e),
    }
}

async fn delete_diagnosis(
    req: HttpRequest,
    user: AuthenticatedUser,
    path: web::Path<String>,
    diagnosis: web::Data<DiagnosisService>,
) -> HttpResponse {
    let prediction_id = match Uuid::parse_str(&path.into_inner()) {
        Ok(id) => id,
        Err(_) => return HttpResponse::BadRequest().body("Invalid UUID format"),
    };

    match diagnosis
        .delete_diagnosis(user.0, prediction_id, client_ip(&req))
        .await
    {
        Ok(()) => {
            info!("deleted diagnosis {} for user {}", prediction_id, user.0);
            HttpResponse::NoContent().finish()
        }
        Err(e) => diagnosis_error_response(&e),
    }
}

async fn statistics(
    user: AuthenticatedUser,
    diagnosis: web::Data<DiagnosisService>,
) -> HttpResponse {
    match diagnosis.statistics(user.0).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => diagnosis_error_response(&e),
    }
}

async fn history(user: AuthenticatedUser, diagnosis: web::Data<DiagnosisService>) -> HttpResponse {
    match diagnosis.history(user.0).await {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(e) => diagnosis_error_response(&e),
    }
}

async fn history_summary(
    user: AuthenticatedUser,
    diagnosis: web::Data<DiagnosisService>,
) -> HttpResponse {
    match diagnosis.history_summary(user.0).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => diagnosis_error_response(&e),
    }
}

async fn model_info(
    db_repo: web::Data<DiagnosisRepository>,
    registry: web::Data<ModelRegistry>,
) -> HttpResponse {
    match db_repo.get_active_model_version().await {
        Ok(Some(record)) => HttpResponse::Ok().json(ModelInfo {
            name: record.name,
            version: record.version,
            input_size: record.input_size,
            accuracy: record.accuracy,
            precision: record.precision,
            recall: record.recall,
            f1_score: record.f1_score,
            is_active: record.is_active,
        }),
        Ok(None) => {
            // no registered row yet; report what the registry itself knows
            let meta = registry.meta();
            HttpResponse::Ok().json(ModelInfo {
                name: meta.name.clone(),
                version: meta.version.clone(),
                input_size: meta.input_size.clone(),
                accuracy: None,
                precision: None,
                recall: None,
                f1_score: None,
                is_active: registry.is_loaded(),
            })
        }
        Err(e) => {
            error!("Failed to fetch model version: {:?}", e);
            HttpResponse::InternalServerError()
                .json(json!({"error": "Failed to fetch model information"}))
        }
    }
}

async fn model_reload(registry: web::Data<ModelRegistry>) -> HttpResponse {
    match registry.reload() {
        Ok(()) => HttpResponse::Ok().json(json!({
            "status": "reloaded",
            "model": registry.meta().tag()
        })),
        Err(e) => {
            error!("model reload failed: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": format!("Reload failed: {}. Previous model retained.", e)
            }))
        }
    }
}
