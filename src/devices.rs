use crate::database::StoreError;
use time::OffsetDateTime;
use uuid::Uuid;

/// Protocol tag recorded on devices enrolled through this server.
pub const PROTOCOL_WINDOWS: &str = "windows";

/// A device, as recorded once after a successful enrollment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub id: Uuid,
    pub display_name: String,
    pub protocol: String,
    pub enrolled_at: OffsetDateTime,
    /// Email of the user who enrolled the device.
    pub enrolled_by: String,
    pub hardware: Hardware,
    pub windows: WindowsDetails,
    pub certificate: CertificateSummary,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hardware {
    pub id: Option<String>,
    pub mac_addresses: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowsDetails {
    pub device_id: String,
    pub device_type: Option<String>,
    pub enrollment_type: String,
    pub os_edition: Option<String>,
    pub os_version: Option<String>,
    pub application_version: Option<String>,
}

/// The identity certificate issued to the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject: String,
    pub hash: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

/// Sink for newly enrolled devices.
pub trait DeviceStore: Send + Sync {
    fn create(&self, device: &Device) -> Result<(), StoreError>;
}
