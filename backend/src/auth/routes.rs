use actix_web::{HttpRequest, HttpResponse, Result, web};
use log::error;

use crate::db::models::{ActivityRecord, UserRecord};
use crate::db::repository::DiagnosisRepository;
use crate::routes::client_ip;
use shared::ActivityKind;

use super::jwt::JwtService;
use super::middleware::AuthenticatedUser;
use super::models::{AuthResponse, AuthUser, LoginRequest, RegisterRequest};
use super::password;

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: message.to_string(),
    })
}

pub async fn register(
    body: web::Json<RegisterRequest>,
    db_repo: web::Data<DiagnosisRepository>,
    jwt_service: web::Data<JwtService>,
) -> Result<HttpResponse> {
    let request = body.into_inner();

    if request.password.len() < 8 {
        return Ok(bad_request("Password must be at least 8 characters"));
    }
    if request.password != request.password_confirm {
        return Ok(bad_request("Passwords must match"));
    }
    if request.username.trim().is_empty() || request.email.trim().is_empty() {
        return Ok(bad_request("Username and email are required"));
    }

    match db_repo.get_user_by_username(&request.username).await {
        Ok(Some(_)) => return Ok(bad_request("Username is already taken")),
        Ok(None) => {}
        Err(e) => {
            error!("Failed to check username {}: {:?}", request.username, e);
            return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Registration failed".to_string(),
            }));
        }
    }

    let salt = password::generate_salt();
    let digest = password::digest(&request.password, &salt);
    let user = UserRecord::new(request.username, request.email, digest, salt);

    if let Err(e) = db_repo.create_user(&user).await {
        error!("Failed to create user {}: {:?}", user.username, e);
        return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Registration failed".to_string(),
        }));
    }

    let auth_user = AuthUser::from(user);
    match jwt_service.generate_token(&auth_user) {
        Ok(token) => Ok(HttpResponse::Created().json(AuthResponse {
            token,
            user: auth_user,
        })),
        Err(e) => {
            error!("Failed to issue token for new user: {:?}", e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Registration failed".to_string(),
            }))
        }
    }
}

pub async fn login(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    db_repo: web::Data<DiagnosisRepository>,
    jwt_service: web::Data<JwtService>,
) -> Result<HttpResponse> {
    let request = body.into_inner();

    let mut user = match db_repo.get_user_by_username(&request.username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Ok(HttpResponse::Unauthorized().json(ErrorResponse {
                error: "Invalid username or password".to_string(),
            }));
        }
        Err(e) => {
            error!("Failed to look up user {}: {:?}", request.username, e);
            return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Login failed".to_string(),
            }));
        }
    };

    if !user.is_active
        || !password::verify(&request.password, &user.password_salt, &user.password_digest)
    {
        return Ok(HttpResponse::Unauthorized().json(ErrorResponse {
            error: "Invalid username or password".to_string(),
        }));
    }

    user.update_last_login();
    if let Err(e) = db_repo.update_user(&user).await {
        log::warn!("Failed to record last login for {}: {:?}", user.username, e);
    }

    let entry = ActivityRecord::new(user.id, ActivityKind::Login, None, None, client_ip(&req));
    if let Err(e) = db_repo.create_activity(&entry).await {
        log::warn!("Failed to record login activity: {:?}", e);
    }

    let auth_user = AuthUser::from(user);
    match jwt_service.generate_token(&auth_user) {
        Ok(token) => Ok(HttpResponse::Ok().json(AuthResponse {
            token,
            user: auth_user,
        })),
        Err(e) => {
            error!("Failed to issue token: {:?}", e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Login failed".to_string(),
            }))
        }
    }
}

/// Tokens are stateless; logout only appends to the audit trail. The client
/// discards the token.
pub async fn logout(
    req: HttpRequest,
    user: AuthenticatedUser,
    db_repo: web::Data<DiagnosisRepository>,
) -> Result<HttpResponse> {
    let entry = ActivityRecord::new(user.0, ActivityKind::Logout, None, None, client_ip(&req));
    if let Err(e) = db_repo.create_activity(&entry).await {
        log::warn!("Failed to record logout activity: {:?}", e);
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({"message": "Successfully logged out"})))
}

pub async fn me(
    user: AuthenticatedUser,
    db_repo: web::Data<DiagnosisRepository>,
) -> Result<HttpResponse> {
    match db_repo.get_user_by_id(user.0).await {
        Ok(Some(user_data)) => Ok(HttpResponse::Ok().json(AuthUser::from(user_data))),
        Ok(None) => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: "User not found".to_string(),
        })),
        Err(e) => {
            error!("Failed to fetch user data for ID {}: {:?}", user.0, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to fetch user".to_string(),
            }))
        }
    }
}
