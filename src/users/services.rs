use lazy_static::lazy_static;
use regex::Regex;

use super::dto::{CreateUserRequest, UpdateUserRequest};
use super::repo::User;
use crate::error::ApiError;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn validate_new_user(req: &CreateUserRequest) -> Result<(), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".into()));
    }
    if !is_valid_email(&req.email) {
        return Err(ApiError::Validation("invalid email".into()));
    }
    if req.password.len() < 6 {
        return Err(ApiError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }
    if !(1..=5).contains(&req.level) {
        return Err(ApiError::Validation("level must be between 1 and 5".into()));
    }
    Ok(())
}

/// Same rules as creation, applied only to the fields that are present.
pub fn validate_user_patch(req: &UpdateUserRequest) -> Result<(), ApiError> {
    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("name must not be empty".into()));
        }
    }
    if let Some(email) = &req.email {
        if !is_valid_email(email) {
            return Err(ApiError::Validation("invalid email".into()));
        }
    }
    if let Some(password) = &req.password {
        if password.len() < 6 {
            return Err(ApiError::Validation(
                "password must be at least 6 characters".into(),
            ));
        }
    }
    if let Some(level) = req.level {
        if !(1..=5).contains(&level) {
            return Err(ApiError::Validation("level must be between 1 and 5".into()));
        }
    }
    Ok(())
}

/// Builds the user report in memory: a header row plus one row per record.
pub fn users_to_csv(users: &[User]) -> anyhow::Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["ID", "Name", "Email", "Level"])?;
    for u in users {
        wtr.write_record([
            u.id.to_string(),
            u.name.clone(),
            u.email.clone(),
            u.level.to_string(),
        ])?;
    }
    wtr.flush()?;
    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("csv writer: {e}"))
}
