use crate::database::StoreError;
use crate::lock_unpoisoned;
use crate::soap::is_valid_email;
use axum::http::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const MAX_TENANT_NAME_LENGTH: usize = 100;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How devices must authenticate to enroll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthPolicy {
    #[default]
    OnPremise,
    Federated,
    Certificate,
}

impl AuthPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthPolicy::OnPremise => "OnPremise",
            AuthPolicy::Federated => "Federated",
            AuthPolicy::Certificate => "Certificate",
        }
    }

    pub fn from_name(name: &str) -> Option<AuthPolicy> {
        match name {
            "OnPremise" => Some(AuthPolicy::OnPremise),
            "Federated" => Some(AuthPolicy::Federated),
            "Certificate" => Some(AuthPolicy::Certificate),
            _ => None,
        }
    }
}

impl fmt::Display for AuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    pub name: String,
    pub support_email: Option<String>,
    pub support_phone: Option<String>,
    pub support_website: Option<String>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        TenantSettings {
            name: "Windows MDM".to_string(),
            support_email: None,
            support_phone: None,
            support_website: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsSettings {
    pub auth_policy: AuthPolicy,
    /// External federation page. When unset, our own page is advertised.
    pub federation_portal_url: Option<String>,
}

/// Tenant-wide settings consulted during enrollment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tenant: TenantSettings,
    /// Email domains whose users may discover this server.
    pub managed_domains: Vec<String>,
    pub windows: WindowsSettings,
}

impl Settings {
    /// Checks the settings and normalizes them for storage.
    pub fn validated(mut self) -> Result<Settings, SettingsError> {
        let invalid = |reason: &str| Err(SettingsError::Invalid(reason.to_string()));

        self.tenant.name = self.tenant.name.trim().to_string();
        if self.tenant.name.is_empty() || self.tenant.name.len() > MAX_TENANT_NAME_LENGTH {
            return invalid("tenant name must be between 1 and 100 characters");
        }

        let tenant = &mut self.tenant;
        for field in [
            &mut tenant.support_email,
            &mut tenant.support_phone,
            &mut tenant.support_website,
        ] {
            // Treat blank contact fields as unset.
            if field.as_deref().is_some_and(|value| value.trim().is_empty()) {
                *field = None;
            }
        }
        if let Some(email) = &tenant.support_email {
            if !is_valid_email(email) {
                return invalid("support email is not a valid email address");
            }
        }
        if let Some(website) = &tenant.support_website {
            if !is_absolute_url(website, &["http", "https"]) {
                return invalid("support website must be an absolute http(s) URL");
            }
        }

        let mut managed_domains = Vec::with_capacity(self.managed_domains.len());
        for domain in &self.managed_domains {
            let domain = domain.trim().to_ascii_lowercase();
            let valid = !domain.is_empty()
                && domain
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
            if !valid {
                return invalid("managed domains must be plain hostnames");
            }
            if !managed_domains.contains(&domain) {
                managed_domains.push(domain);
            }
        }
        self.managed_domains = managed_domains;

        if let Some(url) = &self.windows.federation_portal_url {
            if !is_absolute_url(url, &["https"]) {
                return invalid("federation portal must be an absolute https URL");
            }
        }

        Ok(self)
    }

    /// Whether users of this email domain may enroll.
    pub fn manages_domain(&self, domain: &str) -> bool {
        self.managed_domains
            .iter()
            .any(|managed| managed.eq_ignore_ascii_case(domain))
    }
}

fn is_absolute_url(url: &str, schemes: &[&str]) -> bool {
    let Ok(uri) = url.parse::<Uri>() else {
        return false;
    };
    uri.scheme_str().is_some_and(|scheme| schemes.contains(&scheme))
        && uri.host().is_some_and(|host| !host.is_empty())
}

/// Backing store for the settings snapshot.
pub trait SettingsStore: Send + Sync {
    fn save(&self, settings: &Settings) -> Result<(), StoreError>;
    fn retrieve(&self) -> Result<Option<Settings>, StoreError>;
}

/// In-memory settings snapshot backed by a [`SettingsStore`].
#[derive(Clone)]
pub struct SettingsService {
    current: Arc<Mutex<Settings>>,
    // Serializes writers so a save and its commit are never interleaved.
    updates: Arc<Mutex<()>>,
    store: Arc<dyn SettingsStore>,
}

impl SettingsService {
    /// Loads stored settings, seeding the store with `seed` if it is empty.
    pub fn load(store: Arc<dyn SettingsStore>, seed: Settings) -> Result<Self, SettingsError> {
        let settings = match store.retrieve()? {
            Some(settings) => settings,
            None => {
                let settings = seed.validated()?;
                store.save(&settings)?;
                tracing::info!(tenant = %settings.tenant.name, "seeded tenant settings");
                settings
            }
        };

        Ok(SettingsService {
            current: Arc::new(Mutex::new(settings)),
            updates: Arc::new(Mutex::new(())),
            store,
        })
    }

    /// A copy of the current settings.
    pub fn get(&self) -> Settings {
        lock_unpoisoned(&self.current).clone()
    }

    /// Replaces the settings, returning the previous snapshot.
    ///
    /// The new snapshot only takes effect once it has been persisted.
    /// Readers keep seeing the previous one while the store is written.
    pub fn update(&self, settings: Settings) -> Result<Settings, SettingsError> {
        let settings = settings.validated()?;

        let _update = lock_unpoisoned(&self.updates);
        self.store.save(&settings)?;
        let previous = std::mem::replace(&mut *lock_unpoisoned(&self.current), settings);
        Ok(previous)
    }
}
