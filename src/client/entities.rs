//! Domain entities served through [`ResilientService`](crate::client::resilient::ResilientService).

use crate::client::offline::recovery::RecoveryController;
use crate::client::resilient::ResilientService;
use crate::client::sync::SyncService;
use crate::shared::entity::Entity;
use crate::shared::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SyncError::validation(field, "must not be empty"));
    }
    Ok(())
}

/// Field agency owning resources and users
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

impl Agency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            region: None,
            contact_email: None,
        }
    }
}

impl Entity for Agency {
    const COLLECTION: &'static str = "agencies";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn natural_key(&self) -> Option<(&'static str, String)> {
        Some(("name", self.name.clone()))
    }

    fn sort_key(&self) -> String {
        self.name.to_lowercase()
    }

    fn validate(&self) -> Result<()> {
        require("name", &self.name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Coordinator,
    #[default]
    Member,
}

/// Application user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<String>,
}

impl User {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: None,
            email: email.into(),
            display_name: display_name.into(),
            role: UserRole::default(),
            agency_id: None,
        }
    }
}

impl Entity for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn natural_key(&self) -> Option<(&'static str, String)> {
        Some(("email", self.email.clone()))
    }

    fn sort_key(&self) -> String {
        self.display_name.to_lowercase()
    }

    fn validate(&self) -> Result<()> {
        require("display_name", &self.display_name)?;
        if !self.email.contains('@') {
            return Err(SyncError::validation("email", "must be an email address"));
        }
        Ok(())
    }
}

/// Lendable equipment held by an agency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub category: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<String>,
}

impl Entity for Resource {
    const COLLECTION: &'static str = "resources";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn natural_key(&self) -> Option<(&'static str, String)> {
        Some(("name", self.name.clone()))
    }

    fn sort_key(&self) -> String {
        format!("{}/{}", self.category.to_lowercase(), self.name.to_lowercase())
    }

    fn validate(&self) -> Result<()> {
        require("name", &self.name)?;
        require("category", &self.category)
    }
}

/// Person or organisation borrowing resources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Borrower {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<String>,
}

impl Entity for Borrower {
    const COLLECTION: &'static str = "borrowers";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    // Names repeat across borrowers, so every upsert without an id is a create
    fn sort_key(&self) -> String {
        self.name.to_lowercase()
    }

    fn validate(&self) -> Result<()> {
        require("name", &self.name)
    }
}

pub type AgencyService = ResilientService<Agency>;
pub type UserService = ResilientService<User>;
pub type ResourceService = ResilientService<Resource>;
pub type BorrowerService = ResilientService<Borrower>;

/// One façade per entity type, sharing the sync engine and recovery controller
#[derive(Debug, Clone)]
pub struct Services {
    pub agencies: AgencyService,
    pub users: UserService,
    pub resources: ResourceService,
    pub borrowers: BorrowerService,
}

impl Services {
    pub fn new(sync: Arc<SyncService>, recovery: Arc<RecoveryController>, audit_successful_writes: bool) -> Self {
        Self {
            agencies: ResilientService::new(sync.clone(), recovery.clone()).with_audit(audit_successful_writes),
            users: ResilientService::new(sync.clone(), recovery.clone()).with_audit(audit_successful_writes),
            resources: ResilientService::new(sync.clone(), recovery.clone()).with_audit(audit_successful_writes),
            borrowers: ResilientService::new(sync, recovery).with_audit(audit_successful_writes),
        }
    }
}
