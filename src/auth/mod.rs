use actix_web::dev::Payload;
use actix_web::error::{ErrorInternalServerError, InternalError};
use actix_web::{web, Error, FromRequest, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{ApiResponse, RegisterRequest, User};
use crate::services::{validation, ServiceError};
use crate::store::{Store, StoreError};

pub const TOKEN_TTL_DAYS: i64 = 7;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 30;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // user_id
    pub exp: i64,         // expiration timestamp
    pub iat: i64,         // issued at
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Service(e.into())
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

pub struct AuthService {
    jwt_secret: String,
    store: Arc<Store>,
}

impl AuthService {
    pub fn new(jwt_secret: String, store: Arc<Store>) -> Self {
        Self { jwt_secret, store }
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(password, 10)
    }

    /// Verify a password against a bcrypt hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        bcrypt::verify(password, hash)
    }

    /// Generate a JWT token for a user
    pub fn generate_token(&self, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + Duration::days(TOKEN_TTL_DAYS);

        let claims = Claims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
    }

    /// Validate a JWT token and return the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Create an account and its profile
    pub fn register(&self, req: &RegisterRequest) -> AuthResult<User> {
        let username = req.username.trim();
        let email = req.email.trim();
        validate_username(username)?;
        validate_email(email)?;

        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            ))
            .into());
        }
        if let Some(confirm) = &req.password_confirm {
            if confirm != &req.password {
                return Err(validation("Passwords do not match").into());
            }
        }

        let display_name = req
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(username);

        let mut user = User {
            id: String::new(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: self.hash_password(&req.password)?,
            display_name: display_name.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.create_user(&mut user)?;

        log::info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Check a username (or email) and password pair. A successful login
    /// counts as activity for the online indicator.
    pub fn authenticate(&self, login: &str, password: &str) -> AuthResult<User> {
        let login = login.trim();
        let user = match self.store.get_user_by_username(login) {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => match self.store.get_user_by_email(login) {
                Ok(user) => user,
                Err(StoreError::NotFound(_)) => return Err(AuthError::InvalidCredentials),
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };

        if !self.verify_password(password, &user.password_hash).unwrap_or(false) {
            log::debug!("Failed login for {}", user.username);
            return Err(AuthError::InvalidCredentials);
        }

        self.store.touch_last_seen(&user.id)?;
        log::info!("User {} logged in", user.username);
        Ok(user)
    }

    /// Remove the account and everything it owns
    pub fn delete_account(&self, user_id: &str) -> AuthResult<()> {
        self.store.delete_user(user_id)?;
        log::info!("Deleted account {}", user_id);
        Ok(())
    }
}

fn validate_username(username: &str) -> Result<(), ServiceError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(validation(format!(
            "Username must be between {} and {} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(validation(
            "Username may only contain letters, numbers, underscores and periods",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ServiceError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(validation("Enter a valid email address"));
    }
    Ok(())
}

/// Authenticated user info extracted from request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequest for AuthUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_auth(req))
    }
}

/// Read the bearer token off the request and validate it
pub fn extract_auth(req: &HttpRequest) -> Result<AuthUser, Error> {
    let auth_service = req
        .app_data::<web::Data<Arc<AuthService>>>()
        .ok_or_else(|| ErrorInternalServerError("Auth service not configured"))?;

    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("Invalid Authorization header format"))?;

    let claims = auth_service
        .validate_token(token.trim())
        .map_err(|_| unauthorized("Invalid token"))?;

    Ok(AuthUser { user_id: claims.sub })
}

/// A 401 carrying the usual JSON envelope
pub fn unauthorized(msg: &'static str) -> Error {
    InternalError::from_response(msg, HttpResponse::Unauthorized().json(ApiResponse::<()>::error(msg))).into()
}
