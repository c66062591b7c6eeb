use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::{
    CreateUser, OrganizationDetails, RegistrationStatus, Role, TruckDetails, User, UserRepository,
};
use crate::error::{AppError, AppResult};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 6;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
    pub truck_details: Option<TruckDetails>,
    pub organization_details: Option<OrganizationDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
}

pub struct AuthService;

impl AuthService {
    /// Hash a password on the blocking pool; bcrypt is CPU-bound.
    pub async fn hash_password(password: &str, cost: u32) -> AppResult<String> {
        let password = password.to_string();
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Password hashing task failed: {}", e)))?
            .map_err(AppError::PasswordHash)
    }

    pub async fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Password verification task failed: {}", e))
            })?
            .map_err(AppError::PasswordHash)
    }

    /// Create a signed JWT for an account
    pub fn create_jwt(state: &Arc<AppState>, user: &User) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(state.config.jwt.expiration_minutes);
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(state.config.jwt.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Decode and validate a JWT, returning the claims
    pub fn decode_jwt(state: &Arc<AppState>, token: &str) -> AppResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    /// Resolve a bearer token to a live account. Accounts that are no longer
    /// approved lose access even while their token is unexpired.
    pub async fn get_user_from_token(state: &Arc<AppState>, token: &str) -> AppResult<User> {
        let claims = Self::decode_jwt(state, token)?;
        let user = UserRepository::find_by_id(&state.db, &claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if !user.is_admin() && user.status != RegistrationStatus::Approved {
            tracing::debug!("Token presented for unapproved account {}", user.id);
            return Err(AppError::Unauthorized);
        }
        Ok(user)
    }

    /// Create a PENDING account. Administrators are provisioned at startup and
    /// cannot self-register.
    pub async fn register(state: &Arc<AppState>, registration: Registration) -> AppResult<User> {
        let name = registration.name.trim().to_string();
        let email = normalize_email(&registration.email);

        if name.is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        if !is_plausible_email(&email) {
            return Err(AppError::Validation("A valid email is required".to_string()));
        }
        if registration.password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let role = Role::try_from(registration.role.as_str()).map_err(AppError::Validation)?;
        if role == Role::Admin {
            return Err(AppError::BadRequest(
                "Administrator accounts cannot be registered".to_string(),
            ));
        }

        if UserRepository::find_by_email(&state.db, &email).await?.is_some() {
            return Err(AppError::BadRequest("User already exists".to_string()));
        }

        let password_hash =
            Self::hash_password(&registration.password, state.config.auth.bcrypt_cost).await?;

        let user = UserRepository::create(
            &state.db,
            CreateUser {
                name,
                email,
                password_hash,
                role,
                status: RegistrationStatus::Pending,
                truck_details: match role {
                    Role::Driver => Some(registration.truck_details.unwrap_or_default()),
                    _ => None,
                },
                organization_details: match role {
                    Role::Sender => registration.organization_details,
                    _ => None,
                },
            },
        )
        .await?;

        tracing::info!("Registered {} account {} (pending approval)", user.role, user.id);
        Ok(user)
    }

    /// Authenticate against a portal. Checks run in a fixed order and stop at
    /// the first failure: account lookup, password, portal role, approval status.
    pub async fn login(state: &Arc<AppState>, credentials: Credentials) -> AppResult<(User, String)> {
        let email = normalize_email(&credentials.email);

        let user = UserRepository::find_by_email(&state.db, &email)
            .await?
            .ok_or_else(|| AppError::NotFound(INVALID_CREDENTIALS.to_string()))?;

        if !Self::verify_password(&credentials.password, &user.password_hash).await? {
            return Err(AppError::BadRequest(INVALID_CREDENTIALS.to_string()));
        }

        // An unrecognized portal is a mismatch like any other.
        if Role::try_from(credentials.role.trim()).ok() != Some(user.role) {
            return Err(AppError::Forbidden(format!(
                "Access denied. Please use the {} portal.",
                user.role
            )));
        }

        if !user.is_admin() {
            match user.status {
                RegistrationStatus::Approved => {}
                RegistrationStatus::Pending => {
                    return Err(AppError::AccountNotApproved(pending_message(user.role)))
                }
                RegistrationStatus::Rejected => {
                    return Err(AppError::AccountNotApproved(rejected_message(user.role)))
                }
            }
        }

        let token = Self::create_jwt(state, &user)?;
        tracing::info!("{} {} logged in", user.role, user.id);
        Ok((user, token))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    }
}

fn account_noun(role: Role) -> &'static str {
    match role {
        Role::Driver => "driver",
        Role::Sender => "organization",
        Role::Admin => "administrator",
    }
}

fn pending_message(role: Role) -> String {
    format!(
        "Your {} account is pending approval. Please wait for an administrator to review it.",
        account_noun(role)
    )
}

fn rejected_message(role: Role) -> String {
    format!(
        "Your {} account registration has been rejected. Please contact support.",
        account_noun(role)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_user, test_state, TEST_PASSWORD};

    fn credentials(email: &str, password: &str, role: &str) -> Credentials {
        Credentials {
            email: email.to_string(),
            password: password.to_string(),
            role: role.to_string(),
        }
    }

    #[tokio::test]
    async fn pending_account_never_gets_a_token() {
        let (state, _hub) = test_state().await;
        seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Pending).await;

        let err = AuthService::login(&state, credentials("d@trucks.et", TEST_PASSWORD, "DRIVER"))
            .await
            .unwrap_err();
        match err {
            AppError::AccountNotApproved(msg) => assert!(msg.contains("pending approval")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_account_gets_rejection_message() {
        let (state, _hub) = test_state().await;
        seed_user(&state.db, "s@ngo.org", Role::Sender, RegistrationStatus::Rejected).await;

        let err = AuthService::login(&state, credentials("s@ngo.org", TEST_PASSWORD, "SENDER"))
            .await
            .unwrap_err();
        match err {
            AppError::AccountNotApproved(msg) => assert!(msg.contains("rejected")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn approved_driver_gets_a_valid_token() {
        let (state, _hub) = test_state().await;
        let driver =
            seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;

        let (user, token) =
            AuthService::login(&state, credentials(" D@Trucks.ET ", TEST_PASSWORD, "driver"))
                .await
                .unwrap();
        assert_eq!(user.id, driver.id);

        let claims = AuthService::decode_jwt(&state, &token).unwrap();
        assert_eq!(claims.sub, driver.id);
        assert_eq!(claims.role, Role::Driver);
        assert_eq!(claims.exp - claims.iat, 60 * 60);

        let resolved = AuthService::get_user_from_token(&state, &token).await.unwrap();
        assert_eq!(resolved.id, driver.id);
    }

    #[tokio::test]
    async fn role_mismatch_is_forbidden() {
        let (state, _hub) = test_state().await;
        seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Pending).await;

        let err = AuthService::login(&state, credentials("d@trucks.et", TEST_PASSWORD, "SENDER"))
            .await
            .unwrap_err();
        match err {
            AppError::Forbidden(msg) => {
                assert_eq!(msg, "Access denied. Please use the DRIVER portal.")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn wrong_password_is_reported_before_role() {
        let (state, _hub) = test_state().await;
        seed_user(&state.db, "d@trucks.et", Role::Driver, RegistrationStatus::Approved).await;

        let err = AuthService::login(&state, credentials("d@trucks.et", "nope", "SENDER"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn unknown_email_is_not_found() {
        let (state, _hub) = test_state().await;
        let err = AuthService::login(&state, credentials("ghost@x.org", TEST_PASSWORD, "SENDER"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn admin_skips_status_check() {
        let (state, _hub) = test_state().await;
        seed_user(&state.db, "root@es.et", Role::Admin, RegistrationStatus::Pending).await;

        let result =
            AuthService::login(&state, credentials("root@es.et", TEST_PASSWORD, "ADMIN")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn registration_creates_pending_account() {
        let (state, _hub) = test_state().await;
        let user = AuthService::register(
            &state,
            Registration {
                name: "Abebe".to_string(),
                email: "Abebe@Trucks.ET".to_string(),
                password: "secret123".to_string(),
                role: "DRIVER".to_string(),
                truck_details: None,
                organization_details: Some(OrganizationDetails::default()),
            },
        )
        .await
        .unwrap();

        assert_eq!(user.email, "abebe@trucks.et");
        assert_eq!(user.status, RegistrationStatus::Pending);
        assert!(user.truck_details.is_some());
        assert!(user.organization_details.is_none());
    }

    #[tokio::test]
    async fn registration_rejects_admins_and_duplicates() {
        let (state, _hub) = test_state().await;
        seed_user(&state.db, "taken@ngo.org", Role::Sender, RegistrationStatus::Pending).await;

        let base = Registration {
            name: "Someone".to_string(),
            email: "taken@ngo.org".to_string(),
            password: "secret123".to_string(),
            role: "SENDER".to_string(),
            truck_details: None,
            organization_details: None,
        };

        let duplicate = AuthService::register(&state, base.clone()).await.unwrap_err();
        assert!(matches!(duplicate, AppError::BadRequest(ref m) if m == "User already exists"));

        let admin = AuthService::register(
            &state,
            Registration {
                email: "new@es.et".to_string(),
                role: "ADMIN".to_string(),
                ..base.clone()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(admin, AppError::BadRequest(_)));

        let weak = AuthService::register(
            &state,
            Registration {
                email: "new@ngo.org".to_string(),
                password: "123".to_string(),
                ..base
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(weak, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn tokens_of_unapproved_accounts_are_refused() {
        let (state, _hub) = test_state().await;
        let pending =
            seed_user(&state.db, "p@ngo.org", Role::Sender, RegistrationStatus::Pending).await;
        let token = AuthService::create_jwt(&state, &pending).unwrap();

        let err = AuthService::get_user_from_token(&state, &token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
        assert!(AuthService::get_user_from_token(&state, "garbage").await.is_err());
    }
}
