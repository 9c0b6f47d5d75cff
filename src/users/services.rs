use serde_json::json;
use time::OffsetDateTime;
use tracing::info;

use super::{
    dto::{CreateAdminRequest, CreatedUser, NewUser},
    repo_types::{Role, Trial, TrialType, User, UserStatus},
};
use crate::{
    auth::{
        password::{generate_secure_password, hash_password, validate_password_strength},
        services::{is_valid_email, normalize_email},
    },
    error::{AppError, AppResult, FieldError},
    state::AppState,
    store::StoreError,
};

fn email_taken(e: StoreError) -> AppError {
    match e {
        StoreError::Conflict(_) => AppError::Conflict("User with this email already exists".into()),
        other => other.into(),
    }
}

/// Creates an active account with a generated password, returned once.
pub async fn create_user(state: &AppState, new: NewUser, actor_id: &str) -> AppResult<CreatedUser> {
    if state.store.find_user_by_email(&new.email).await?.is_some() {
        return Err(AppError::Conflict("User with this email already exists".into()));
    }

    let now = OffsetDateTime::now_utc();
    let password = generate_secure_password();
    let password_hash = hash_password(&password).await?;
    let mut user = User::new(
        &new.email,
        new.display_name,
        password_hash,
        new.role,
        UserStatus::Active,
        now,
    );
    user.metadata = new.metadata;
    user.trial = Some(match new.trial {
        Some(input) => input.into_trial(now),
        None => Trial::for_type(TrialType::Count, Some(10), now),
    });
    state.store.insert_user(&user).await.map_err(email_taken)?;

    info!(user_id = %user.id, role = %user.role, "user created");
    state
        .events
        .write(
            "users.create.success",
            json!({
                "userId": actor_id,
                "newUserId": user.id,
                "email": user.email,
                "role": user.role,
            }),
        )
        .await;

    Ok(CreatedUser {
        id: user.id,
        email: user.email,
        display_name: user.display_name,
        role: user.role,
        password,
    })
}

/// First-run admin creation, gated by the setup token.
pub async fn bootstrap_admin(state: &AppState, req: CreateAdminRequest) -> AppResult<String> {
    let email = normalize_email(&req.email);
    let mut errors = Vec::new();
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "must be a valid email address"));
    }
    errors.extend(
        validate_password_strength(&req.password)
            .into_iter()
            .map(|m| FieldError::new("password", m)),
    );
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("User already exists".into()));
    }

    let now = OffsetDateTime::now_utc();
    let password_hash = hash_password(&req.password).await?;
    let display_name = match req.display_name.trim() {
        "" => email.clone(),
        name => name.to_string(),
    };
    let user = User::new(&email, display_name, password_hash, Role::Admin, UserStatus::Active, now);
    state
        .store
        .insert_user(&user)
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => AppError::Conflict("User already exists".into()),
            other => other.into(),
        })?;

    info!(user_id = %user.id, "admin bootstrapped");
    state
        .events
        .write(
            "admin.bootstrap.success",
            json!({ "userId": user.id, "email": user.email }),
        )
        .await;
    Ok(user.id)
}
