use crate::certificates::{CertificateError, CertificateService};
use crate::config::Config;
use crate::database::{Database, StoreError};
use crate::devices::DeviceStore;
use crate::settings::{Settings, SettingsError, SettingsService};
use crate::users::UserStore;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("unable to open database: {0}")]
    Database(#[from] StoreError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Certificates(#[from] CertificateError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub settings: SettingsService,
    pub certificates: CertificateService,
    pub devices: Arc<dyn DeviceStore>,
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    /// Opens the datastore and wires every service to it.
    ///
    /// The identity is not generated here. Call `certificates.identity()`
    /// from a blocking task to bootstrap it ahead of the first request.
    pub fn with_config(config: Config) -> Result<Self, StateError> {
        let database = Arc::new(Database::open(&config.storage)?);

        let settings = SettingsService::load(database.clone(), config.settings.clone())?;
        let certificates = CertificateService::new(
            database.clone(),
            config.identity.key_bits,
            &settings.get().tenant.name,
        );

        Ok(AppState {
            config,
            settings,
            certificates,
            devices: database.clone(),
            users: database,
        })
    }

    /// Applies new tenant settings.
    ///
    /// The identity's subject carries the tenant name, so renaming the
    /// tenant regenerates it. This performs RSA key generation.
    pub fn update_settings(&self, settings: Settings) -> Result<Settings, StateError> {
        let previous = self.settings.update(settings)?;
        let current = self.settings.get();

        if previous.tenant.name != current.tenant.name {
            if let Err(err) = self.certificates.regenerate_identity(&current.tenant.name) {
                // Keep the settings consistent with the identity still in use.
                if let Err(rollback) = self.settings.update(previous) {
                    tracing::error!(error = %rollback, "unable to restore previous settings");
                }
                return Err(err.into());
            }
        }

        Ok(current)
    }

    /// Every hostname a request's `To` header may name.
    ///
    /// Windows looks for `enterpriseenrollment.<email domain>`, so each
    /// managed domain contributes one alongside our configured domains.
    pub fn enrollment_domains(&self, settings: &Settings) -> Vec<String> {
        let mut domains = self.config.enrollment_domains();
        for managed in &settings.managed_domains {
            let domain = format!("enterpriseenrollment.{managed}");
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
        domains
    }

    /// Absolute URL of a path on the primary domain.
    pub fn service_url(&self, path: &str) -> String {
        self.config.service_url(path)
    }
}
