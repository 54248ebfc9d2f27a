mod provisioning;
mod wap;

pub use provisioning::{DEVICE_ENROLLMENT, ProvisioningProfile, certificate_store};
pub use wap::{Characteristic, Parm, WapProvisioningDoc};
