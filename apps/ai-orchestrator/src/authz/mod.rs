//! Resource authorization.
//!
//! Identity is established upstream; this service receives the caller as
//! `X-User-Id` / `X-User-Staff` headers and decides per resource kind what
//! that caller may do.

use axum::http::HeaderMap;

use crate::errors::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const STAFF_HEADER: &str = "x-user-staff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub user_id: i64,
    pub is_staff: bool,
}

impl Subject {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or(AppError::Unauthorized)?;

        let is_staff = headers
            .get(STAFF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self { user_id, is_staff })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
}

pub trait ResourcePolicy {
    fn authorize(&self, subject: &Subject, action: Action) -> bool;
}

/// Fails with `Forbidden` when the policy denies the action.
pub fn require(policy: &dyn ResourcePolicy, subject: &Subject, action: Action) -> Result<(), AppError> {
    if policy.authorize(subject, action) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// Something a single user owns (their CV, portfolio, chat).
#[derive(Debug, Clone)]
pub struct OwnedResource {
    pub owner_id: i64,
}

impl ResourcePolicy for OwnedResource {
    fn authorize(&self, subject: &Subject, _action: Action) -> bool {
        subject.is_staff || subject.user_id == self.owner_id
    }
}

/// A peer group.
#[derive(Debug, Clone)]
pub struct GroupResource {
    pub is_private: bool,
    pub member_ids: Vec<i64>,
    pub admin_ids: Vec<i64>,
}

impl ResourcePolicy for GroupResource {
    fn authorize(&self, subject: &Subject, action: Action) -> bool {
        if subject.is_staff {
            return true;
        }
        let is_admin = self.admin_ids.contains(&subject.user_id);
        match action {
            Action::Read => {
                !self.is_private || is_admin || self.member_ids.contains(&subject.user_id)
            }
            Action::Write | Action::Delete => is_admin,
        }
    }
}

/// A company page; recruiters can edit it, only the owner can delete it.
#[derive(Debug, Clone)]
pub struct CompanyResource {
    pub owner_id: i64,
    pub recruiter_ids: Vec<i64>,
}

impl ResourcePolicy for CompanyResource {
    fn authorize(&self, subject: &Subject, action: Action) -> bool {
        if subject.is_staff {
            return true;
        }
        let is_owner = subject.user_id == self.owner_id;
        match action {
            Action::Read => true,
            Action::Write => is_owner || self.recruiter_ids.contains(&subject.user_id),
            Action::Delete => is_owner,
        }
    }
}

/// Staff-only operations (cache administration).
#[derive(Debug, Clone, Copy)]
pub struct StaffOnly;

impl ResourcePolicy for StaffOnly {
    fn authorize(&self, subject: &Subject, _action: Action) -> bool {
        subject.is_staff
    }
}
