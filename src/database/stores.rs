use super::{
    Database, StoreError,
    models::{DeviceRow, IdentityRow, SettingsRow, UserRow},
    schema::{devices, identities, settings, users},
};
use crate::certificates::{IdentityStore, StoredIdentity};
use crate::devices::{Device, DeviceStore};
use crate::settings::{Settings, SettingsStore};
use crate::users::{UserStore, hash_password, verify_password};
use diesel::prelude::*;
use time::OffsetDateTime;

// Singleton rows are kept under a stable key.
const IDENTITY_KEY: &str = "identity";
const SETTINGS_KEY: &str = "settings";

impl IdentityStore for Database {
    fn save(&self, identity: &StoredIdentity) -> Result<(), StoreError> {
        let row = IdentityRow {
            id: IDENTITY_KEY.to_string(),
            certificate: identity.certificate_der.clone(),
            private_key: identity.private_key_der.clone(),
            created_at: OffsetDateTime::now_utc(),
        };

        diesel::replace_into(identities::table)
            .values(&row)
            .execute(&mut self.connection()?)?;
        Ok(())
    }

    fn retrieve(&self) -> Result<Option<StoredIdentity>, StoreError> {
        let row = identities::table
            .find(IDENTITY_KEY)
            .first::<IdentityRow>(&mut self.connection()?)
            .optional()?;

        Ok(row.map(|row| StoredIdentity {
            certificate_der: row.certificate,
            private_key_der: row.private_key,
        }))
    }
}

impl DeviceStore for Database {
    fn create(&self, device: &Device) -> Result<(), StoreError> {
        let row = DeviceRow {
            id: device.id.to_string(),
            display_name: device.display_name.clone(),
            protocol: device.protocol.clone(),
            enrolled_at: device.enrolled_at,
            enrolled_by: device.enrolled_by.clone(),
            hardware_id: device.hardware.id.clone(),
            mac_addresses: serde_json::to_string(&device.hardware.mac_addresses)?,
            windows_device_id: device.windows.device_id.clone(),
            device_type: device.windows.device_type.clone(),
            enrollment_type: device.windows.enrollment_type.clone(),
            os_edition: device.windows.os_edition.clone(),
            os_version: device.windows.os_version.clone(),
            application_version: device.windows.application_version.clone(),
            certificate_subject: device.certificate.subject.clone(),
            certificate_hash: device.certificate.hash.clone(),
            certificate_not_before: device.certificate.not_before,
            certificate_not_after: device.certificate.not_after,
        };

        // Devices are only ever created once.
        diesel::insert_into(devices::table)
            .values(&row)
            .execute(&mut self.connection()?)?;
        Ok(())
    }
}

impl SettingsStore for Database {
    fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        let row = SettingsRow {
            id: SETTINGS_KEY.to_string(),
            document: serde_json::to_string(settings)?,
            updated_at: OffsetDateTime::now_utc(),
        };

        diesel::replace_into(settings::table)
            .values(&row)
            .execute(&mut self.connection()?)?;
        Ok(())
    }

    fn retrieve(&self) -> Result<Option<Settings>, StoreError> {
        let document = settings::table
            .find(SETTINGS_KEY)
            .select(settings::document)
            .first::<String>(&mut self.connection()?)
            .optional()?;

        match document {
            Some(document) => Ok(Some(serde_json::from_str(&document)?)),
            None => Ok(None),
        }
    }
}

impl UserStore for Database {
    fn verify_login(&self, email: &str, password: &str) -> Result<bool, StoreError> {
        let email = email.to_ascii_lowercase();
        let password_hash = users::table
            .find(email.as_str())
            .select(users::password_hash)
            .first::<String>(&mut self.connection()?)
            .optional()?;

        match password_hash {
            Some(password_hash) => verify_password(password, &password_hash),
            None => Ok(false),
        }
    }

    fn create_user(&self, email: &str, password: &str) -> Result<(), StoreError> {
        let row = UserRow {
            email: email.to_ascii_lowercase(),
            password_hash: hash_password(password)?,
            created_at: OffsetDateTime::now_utc(),
        };

        diesel::replace_into(users::table)
            .values(&row)
            .execute(&mut self.connection()?)?;
        Ok(())
    }
}
