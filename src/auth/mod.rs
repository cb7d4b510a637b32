/*!
 * # Authentication and Authorization
 *
 * Sign-up, sign-in, sign-out and current-user lookup for marketplace
 * profiles. Access tokens are HS256 JWTs carrying the profile role; the
 * middleware in this module turns a bearer token into an [`AuthUser`]
 * request extension and the role guard rejects callers outside an
 * allowed set of [`UserRole`]s.
 */

use crate::{
    config::AppConfig,
    entities::{profile, UserRole},
    errors::ServiceError,
    events::{Event, EventSender},
};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

mod password;

pub use password::{hash_password, verify_password};

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // Subject (profile ID)
    pub name: String,  // Display name
    pub email: String, // Login email
    pub role: UserRole,
    pub jti: String, // Token ID, used for revocation
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Authenticated caller, extracted from the access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub token_id: String,
    pub expires_at: i64,
}

impl AuthUser {
    pub fn has_role(&self, role: UserRole) -> bool {
        self.role == role
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(UserRole::Admin)
    }

    pub fn is_farmer(&self) -> bool {
        self.has_role(UserRole::Farmer)
    }

    pub fn is_buyer(&self) -> bool {
        self.has_role(UserRole::Buyer)
    }

    /// Fails with `AuthorizationError` unless the caller holds one of `roles`.
    pub fn require_any(&self, roles: &[UserRole]) -> Result<(), ServiceError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ServiceError::AuthorizationError(format!(
                "{} accounts cannot perform this action",
                self.role
            )))
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: String, jwt_issuer: String, access_token_expiration: Duration) -> Self {
        Self {
            jwt_secret,
            jwt_issuer,
            access_token_expiration,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.auth_issuer.clone(),
            Duration::from_secs(cfg.jwt_expiration as u64),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 2, max = 120))]
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Result of a successful sign-up or sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: profile::ProfileView,
    #[serde(flatten)]
    pub token: TokenPair,
}

pub struct AuthService {
    config: AuthConfig,
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    /// Revoked token ids mapped to their expiry timestamp
    revoked: DashMap<String, i64>,
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            config,
            db,
            event_sender,
            revoked: DashMap::new(),
        }
    }

    /// Registers a new Farmer or Buyer profile and signs it in.
    #[instrument(skip(self, request), fields(email = %request.email, role = %request.role))]
    pub async fn sign_up(&self, request: SignUpRequest) -> Result<AuthSession, ServiceError> {
        if request.role == UserRole::Admin {
            return Err(ServiceError::AuthorizationError(
                "Admin accounts cannot be self-registered".to_string(),
            ));
        }
        let created = self.create_profile(request).await?;
        self.session_for(created)
    }

    /// Creates the configured admin profile unless that email is already registered.
    pub async fn ensure_admin(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ServiceError> {
        let exists = profile::Entity::find()
            .filter(profile::Column::Email.eq(email.trim().to_ascii_lowercase()))
            .one(&*self.db)
            .await?
            .is_some();
        if exists {
            return Ok(());
        }

        self.create_profile(SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
            role: UserRole::Admin,
        })
        .await?;
        Ok(())
    }

    /// Validates and stores a profile of any role.
    pub async fn create_profile(
        &self,
        request: SignUpRequest,
    ) -> Result<profile::Model, ServiceError> {
        request.validate()?;
        let email = request.email.trim().to_ascii_lowercase();

        let existing = profile::Entity::find()
            .filter(profile::Column::Email.eq(email.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::ValidationError(
                "An account with this email already exists".to_string(),
            ));
        }

        let password_hash = hash_password(&request.password)?;
        let created = profile::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            email: Set(email),
            role: Set(request.role),
            password_hash: Set(password_hash),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::UserRegistered {
                user_id: created.id,
                role: created.role,
            })
            .await;

        info!(user_id = %created.id, role = %created.role, "profile registered");
        Ok(created)
    }

    /// Exchanges email and password for an access token.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn sign_in(&self, request: SignInRequest) -> Result<AuthSession, ServiceError> {
        request.validate()?;
        let invalid = || ServiceError::AuthenticationError("Invalid email or password".to_string());

        let found = profile::Entity::find()
            .filter(profile::Column::Email.eq(request.email.trim().to_ascii_lowercase()))
            .one(&*self.db)
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&found.password_hash, &request.password)? {
            warn!(user_id = %found.id, "sign-in rejected");
            return Err(invalid());
        }

        self.session_for(found)
    }

    /// Revokes the caller's current token.
    pub fn sign_out(&self, user: &AuthUser) {
        let now = Utc::now().timestamp();
        self.revoked.retain(|_, exp| *exp > now);
        self.revoked.insert(user.token_id.clone(), user.expires_at);
        info!(user_id = %user.user_id, "signed out");
    }

    /// Loads the caller's profile.
    pub async fn current_user(
        &self,
        user: &AuthUser,
    ) -> Result<profile::ProfileView, ServiceError> {
        profile::Entity::find_by_id(user.user_id)
            .one(&*self.db)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::NotFound(format!("Profile {}", user.user_id)))
    }

    fn session_for(&self, model: profile::Model) -> Result<AuthSession, ServiceError> {
        let token = self.issue_token(&model)?;
        Ok(AuthSession {
            user: model.into(),
            token,
        })
    }

    /// Signs a fresh access token for a profile.
    pub fn issue_token(&self, model: &profile::Model) -> Result<TokenPair, ServiceError> {
        let now = Utc::now();
        let lifetime = ChronoDuration::from_std(self.config.access_token_expiration)
            .map_err(|_| ServiceError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: model.id.to_string(),
            name: model.name.clone(),
            email: model.email.clone(),
            role: model.role,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + lifetime).timestamp(),
            iss: self.config.jwt_issuer.clone(),
        };

        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("token creation failed: {}", e)))?;

        Ok(TokenPair {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: lifetime.num_seconds(),
        })
    }

    /// Validates a JWT and turns its claims into an [`AuthUser`].
    pub fn validate_token(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ServiceError::AuthenticationError("Token expired".to_string())
            }
            _ => ServiceError::AuthenticationError("Invalid token".to_string()),
        })?
        .claims;

        if self.revoked.contains_key(&claims.jti) {
            return Err(ServiceError::AuthenticationError(
                "Token has been revoked".to_string(),
            ));
        }

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::AuthenticationError("Invalid token".to_string()))?;

        Ok(AuthUser {
            user_id,
            name: claims.name,
            email: claims.email,
            role: claims.role,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolves the bearer token into an [`AuthUser`] request extension.
///
/// Expects `Arc<AuthService>` in the request extensions.
pub async fn auth_middleware(mut request: Request, next: Next) -> Result<Response, ServiceError> {
    let auth_service = request
        .extensions()
        .get::<Arc<AuthService>>()
        .cloned()
        .ok_or_else(|| {
            ServiceError::InternalError("Authentication service not available".to_string())
        })?;

    let token = bearer_token(request.headers()).ok_or_else(|| {
        ServiceError::AuthenticationError("Missing bearer token".to_string())
    })?;
    let user = auth_service.validate_token(token)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Rejects authenticated callers whose role is not in the allowed set.
pub async fn role_middleware(
    State(allowed): State<&'static [UserRole]>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ServiceError::AuthenticationError("Not signed in".to_string()))?;
    user.require_any(allowed)?;
    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ServiceError::AuthenticationError("Not signed in".to_string()))
    }
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_roles(self, roles: &'static [UserRole]) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_roles(self, roles: &'static [UserRole]) -> Self {
        self.layer(axum::middleware::from_fn_with_state(roles, role_middleware))
            .with_auth()
    }
}
