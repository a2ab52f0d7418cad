use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metadata::{EntitiesDescriptor, EntityDescriptor, RoleDescriptor};

//------------ ApiResponse ---------------------------------------------------

/// This type defines all responses the tool can report.
#[derive(Clone, Debug)]
pub enum ApiResponse {
    Entity(Arc<EntityDescriptor>),
    Group(Arc<EntitiesDescriptor>),
    Roles(Vec<Arc<RoleDescriptor>>),
    Refreshed(Vec<RefreshStatus>),
    Verified(VerifyOutcome),

    /// Nothing matched the lookup.
    NotFound(String),
}

impl ApiResponse {
    pub fn report(&self, fmt: ReportFormat) -> Result<String, ReportError> {
        match self {
            ApiResponse::Entity(entity) => entity.as_ref().report(fmt),
            ApiResponse::Group(group) => group.as_ref().report(fmt),
            ApiResponse::Roles(roles) => roles.report(fmt),
            ApiResponse::Refreshed(list) => list.report(fmt),
            ApiResponse::Verified(outcome) => outcome.report(fmt),
            ApiResponse::NotFound(what) => match fmt {
                ReportFormat::Json => json(&serde_json::json!({
                    "not_found": what
                })),
                ReportFormat::Text => Ok(format!("Not found: {}", what)),
            },
        }
    }
}

//------------ RefreshStatus -------------------------------------------------

/// The outcome of refreshing a single provider.
#[derive(Clone, Debug, Serialize)]
pub struct RefreshStatus {
    pub provider: String,
    pub error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub next_refresh: Option<DateTime<Utc>>,
}

//------------ VerifyOutcome -------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct VerifyOutcome {
    pub peer: String,
    pub subject: String,
    pub engine: &'static str,
    pub trusted: bool,
}

//------------ ReportFormat --------------------------------------------------

/// This type defines the format to use when representing the api response
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportFormat {
    Json,
    Text,
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, ReportError> {
        match s {
            "json" => Ok(ReportFormat::Json),
            "text" => Ok(ReportFormat::Text),
            _ => Err(ReportError::UnrecognisedFormat(s.to_string())),
        }
    }
}

//------------ ReportError ---------------------------------------------------

#[derive(Debug)]
pub enum ReportError {
    UnrecognisedFormat(String),
    Json(serde_json::Error),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReportError::UnrecognisedFormat(s) => {
                write!(f, "This report format is not recognised: {}", s)
            }
            ReportError::Json(e) => write!(f, "Cannot serialize report: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Json(e)
    }
}

//------------ Report --------------------------------------------------------

/// Implemented by everything the tool reports.
trait Report {
    fn report(&self, format: ReportFormat) -> Result<String, ReportError>;
}

fn json(value: &impl Serialize) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn push_roles(res: &mut String, roles: &[Arc<RoleDescriptor>], indent: &str) {
    for role in roles {
        res.push_str(&format!("{}{}\n", indent, role.role.local_name()));
        for endpoint in &role.endpoints {
            res.push_str(&format!(
                "{}  {} {} {}\n",
                indent,
                endpoint.name.local_name(),
                endpoint.binding,
                endpoint.location
            ));
        }
    }
}

impl Report for EntityDescriptor {
    fn report(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => json(self),
            ReportFormat::Text => {
                let mut res = format!("Entity: {}\n", self.entity_id);
                if let Some(valid_until) = self.valid_until {
                    res.push_str(&format!("Valid until: {}\n", valid_until));
                }
                res.push_str("Roles:\n");
                if self.role_descriptors.is_empty() {
                    res.push_str("  <none>\n");
                }
                push_roles(&mut res, &self.role_descriptors, "  ");
                Ok(res)
            }
        }
    }
}

impl Report for EntitiesDescriptor {
    fn report(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => json(self),
            ReportFormat::Text => {
                let mut res = format!(
                    "Group: {}\n",
                    self.name.as_deref().unwrap_or("<unnamed>")
                );
                fn push_entities(res: &mut String, group: &EntitiesDescriptor) {
                    for entity in &group.entity_descriptors {
                        res.push_str(&format!("  {}\n", entity.entity_id));
                    }
                    for nested in &group.entities_descriptors {
                        push_entities(res, nested);
                    }
                }
                push_entities(&mut res, self);
                Ok(res)
            }
        }
    }
}

impl Report for Vec<Arc<RoleDescriptor>> {
    fn report(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => json(self),
            ReportFormat::Text => {
                let mut res = String::new();
                push_roles(&mut res, self, "");
                Ok(res)
            }
        }
    }
}

impl Report for Vec<RefreshStatus> {
    fn report(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => json(self),
            ReportFormat::Text => {
                let mut res = String::new();
                for status in self {
                    match &status.error {
                        Some(err) => res.push_str(&format!(
                            "{}: failed: {}\n",
                            status.provider, err
                        )),
                        None => res.push_str(&format!(
                            "{}: refreshed, next refresh {}\n",
                            status.provider,
                            status
                                .next_refresh
                                .map(|time| time.to_string())
                                .unwrap_or_else(|| "unknown".into())
                        )),
                    }
                }
                Ok(res)
            }
        }
    }
}

impl Report for VerifyOutcome {
    fn report(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => json(self),
            ReportFormat::Text => Ok(format!(
                "Certificate '{}' is {} for {} ({})",
                self.subject,
                if self.trusted { "trusted" } else { "NOT trusted" },
                self.peer,
                self.engine
            )),
        }
    }
}

//------------ Tests ---------------------------------------------------------
