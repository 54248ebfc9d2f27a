use super::schema::{devices, identities, settings, users};
use diesel::prelude::*;
use time::OffsetDateTime;

#[derive(Queryable, Insertable)]
#[diesel(table_name = identities)]
pub struct IdentityRow {
    pub id: String,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    pub created_at: OffsetDateTime,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = devices)]
pub struct DeviceRow {
    pub id: String,
    pub display_name: String,
    pub protocol: String,
    pub enrolled_at: OffsetDateTime,
    pub enrolled_by: String,
    pub hardware_id: Option<String>,
    /// JSON array of MAC addresses.
    pub mac_addresses: String,
    pub windows_device_id: String,
    pub device_type: Option<String>,
    pub enrollment_type: String,
    pub os_edition: Option<String>,
    pub os_version: Option<String>,
    pub application_version: Option<String>,
    pub certificate_subject: String,
    pub certificate_hash: String,
    pub certificate_not_before: OffsetDateTime,
    pub certificate_not_after: OffsetDateTime,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = settings)]
pub struct SettingsRow {
    pub id: String,
    pub document: String,
    pub updated_at: OffsetDateTime,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = users)]
pub struct UserRow {
    pub email: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}
