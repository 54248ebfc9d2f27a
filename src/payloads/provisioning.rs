use super::wap::{Characteristic, Parm, WapProvisioningDoc};
use crate::certificates::RENEWAL_PERIOD;
use crate::devices::Device;
use crate::settings::Settings;
use base64::{Engine, engine::general_purpose::STANDARD};

/// Enrollment type of a device (rather than user) enrollment.
pub const DEVICE_ENROLLMENT: &str = "Device";

/// Certificate store the client certificate is installed into.
pub fn certificate_store(enrollment_type: &str) -> &'static str {
    if enrollment_type == DEVICE_ENROLLMENT {
        "System"
    } else {
        "User"
    }
}

/// Everything needed to provision a freshly enrolled device.
pub struct ProvisioningProfile<'a> {
    pub identity_der: &'a [u8],
    pub identity_fingerprint: &'a str,
    pub client_der: &'a [u8],
    pub client_fingerprint: &'a str,
    pub device: &'a Device,
    pub settings: &'a Settings,
    pub provider_id: &'a str,
    /// Where the device reaches the management endpoint.
    pub management_url: String,
    /// Advertised as the help website when the tenant has none.
    pub fallback_website: String,
}

impl ProvisioningProfile<'_> {
    pub fn build(&self) -> WapProvisioningDoc {
        let device_enrollment = self.device.windows.enrollment_type == DEVICE_ENROLLMENT;

        let mut characteristics = vec![self.certificate_store()];
        if device_enrollment {
            characteristics.push(registry());
        }
        characteristics.push(self.application());
        characteristics.push(self.dm_client());

        WapProvisioningDoc::new(characteristics)
    }

    // https://learn.microsoft.com/en-us/windows/client-management/mdm/certificatestore-csp
    fn certificate_store(&self) -> Characteristic {
        let store = certificate_store(&self.device.windows.enrollment_type);

        let root = Characteristic::path(
            &["Root", "System"],
            Characteristic::new(self.identity_fingerprint).with_parms([Parm::untyped(
                "EncodedCertificate",
                STANDARD.encode(self.identity_der),
            )]),
        );

        let client = Characteristic::new("My").with_child(
            Characteristic::new(store)
                .with_child(
                    Characteristic::new(self.client_fingerprint).with_parms([
                        Parm::untyped(
                            "EncodedCertificate",
                            STANDARD.encode(self.client_der),
                        ),
                    ]),
                )
                .with_child(Characteristic::new("PrivateKeyContainer")),
        );

        Characteristic::new("CertificateStore")
            .with_child(root)
            .with_child(client)
    }

    // https://learn.microsoft.com/en-us/windows/client-management/mdm/w7-application-csp
    fn application(&self) -> Characteristic {
        let client_auth = Characteristic::new("APPAUTH").with_parms([
            Parm::untyped("AAUTHLEVEL", "CLIENT"),
            Parm::untyped("AAUTHTYPE", "DIGEST"),
            Parm::untyped("AAUTHSECRET", "dummy"),
            Parm::untyped("AAUTHDATA", "nonce"),
        ]);
        let server_auth = Characteristic::new("APPAUTH").with_parms([
            Parm::untyped("AAUTHLEVEL", "APPSRV"),
            Parm::untyped("AAUTHTYPE", "DIGEST"),
            Parm::untyped("AAUTHNAME", "dummy"),
            Parm::untyped("AAUTHSECRET", "dummy"),
            Parm::untyped("AAUTHDATA", "nonce"),
        ]);

        Characteristic::new("APPLICATION")
            .with_parms([
                Parm::untyped("APPID", "w7"),
                Parm::untyped("PROVIDER-ID", self.provider_id),
                Parm::untyped("ADDR", self.management_url.as_str()),
                Parm::untyped("NAME", self.settings.tenant.name.as_str()),
                Parm::flag("BACKCOMPATRETRYDISABLED"),
                Parm::untyped("CONNRETRYFREQ", "3"),
                Parm::untyped("DEFAULTENCODING", "application/vnd.syncml.dm+xml"),
                // Both in milliseconds.
                Parm::untyped("INITIALBACKOFFTIME", "16000"),
                Parm::untyped("MAXBACKOFFTIME", "86400000"),
                Parm::untyped("PROTOVER", "1.2"),
                Parm::untyped("ROLE", "4294967295"),
            ])
            .with_child(client_auth)
            .with_child(server_auth)
    }

    // https://learn.microsoft.com/en-us/windows/client-management/mdm/dmclient-csp
    fn dm_client(&self) -> Characteristic {
        let tenant = &self.settings.tenant;

        let mut parms = vec![
            Parm::string("EntDeviceName", self.device.display_name.as_str()),
            Parm::string("EntDMID", self.device.id.to_string()),
            // Two years.
            Parm::integer("NumberOfDaysAfterLostContactToUnenroll", 730),
        ];
        if let Some(phone) = &tenant.support_phone {
            parms.push(Parm::string("HelpPhoneNumber", phone.as_str()));
        }
        if let Some(email) = &tenant.support_email {
            parms.push(Parm::string("HelpEmailAddress", email.as_str()));
        }
        let website = tenant
            .support_website
            .clone()
            .unwrap_or_else(|| self.fallback_website.clone());
        parms.push(Parm::string("HelpWebsite", website));

        let poll = Characteristic::new("Poll").with_parms([
            Parm::integer("IntervalForFirstSetOfRetries", 15),
            Parm::integer("NumberOfFirstRetries", 5),
            Parm::integer("IntervalForSecondSetOfRetries", 60),
            Parm::integer("NumberOfSecondRetries", 10),
            Parm::integer("IntervalForRemainingScheduledRetries", 1440),
            Parm::integer("NumberOfRemainingScheduledRetries", 0),
            Parm::boolean("PollOnLogin", true),
            Parm::boolean("AllUsersPollOnFirstLogin", true),
        ]);
        let complete_page = Characteristic::new("CustomEnrollmentCompletePage").with_parms([
            Parm::string("Title", "Enrollment Complete"),
            Parm::string(
                "BodyText",
                format!(
                    "Your device is now being managed by '{}'. Please contact your IT administrators for support if you have any problems.",
                    tenant.name
                ),
            ),
        ]);

        Characteristic::path(
            &["DMClient", "Provider"],
            Characteristic::new(self.provider_id)
                .with_parms(parms)
                .with_child(poll)
                .with_child(complete_page),
        )
    }
}

/// Renewal and retry behaviour for device enrollments.
fn registry() -> Characteristic {
    let renewal_days = RENEWAL_PERIOD.as_secs() / (24 * 60 * 60);

    Characteristic::new("Registry")
        .with_child(
            Characteristic::new(r"HKLM\Security\MachineEnrollment")
                .with_parms([Parm::integer("RenewalPeriod", renewal_days)]),
        )
        .with_child(
            Characteristic::new(r"HKLM\Security\MachineEnrollment\OmaDmRetry").with_parms([
                Parm::integer("NumRetries", 8),
                Parm::integer("RetryInterval", 15),
                Parm::integer("AuxNumRetries", 5),
                Parm::integer("AuxRetryInterval", 3),
                Parm::integer("Aux2NumRetries", 0),
                Parm::integer("Aux2RetryInterval", 480),
            ]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{CertificateSummary, Hardware, PROTOCOL_WINDOWS, WindowsDetails};
    use crate::soap::Element;
    use time::OffsetDateTime;

    fn device(enrollment_type: &str) -> Device {
        Device {
            id: uuid::Uuid::new_v4(),
            display_name: "DESKTOP-1".to_string(),
            protocol: PROTOCOL_WINDOWS.to_string(),
            enrolled_at: OffsetDateTime::now_utc(),
            enrolled_by: "oscar@acme.test".to_string(),
            hardware: Hardware::default(),
            windows: WindowsDetails {
                device_id: "ABCDEF".to_string(),
                enrollment_type: enrollment_type.to_string(),
                ..Default::default()
            },
            certificate: CertificateSummary {
                subject: "CN=ABCDEF".to_string(),
                hash: "CLIENT".to_string(),
                not_before: OffsetDateTime::now_utc(),
                not_after: OffsetDateTime::now_utc(),
            },
        }
    }

    fn render(device: &Device, settings: &Settings) -> Element {
        let profile = ProvisioningProfile {
            identity_der: b"identity",
            identity_fingerprint: "IDENTITY",
            client_der: b"client",
            client_fingerprint: "CLIENT",
            device,
            settings,
            provider_id: "WindowsMDMServer",
            management_url: "https://mdm.acme.test/ManagementServer/MDM.svc".to_string(),
            fallback_website: "https://mdm.acme.test".to_string(),
        };
        Element::parse(&profile.build().to_xml().unwrap()).unwrap()
    }

    fn characteristic<'a>(parent: &'a Element, kind: &str) -> Option<&'a Element> {
        parent
            .children()
            .iter()
            .find(|child| child.name == "characteristic" && child.attribute("type") == Some(kind))
    }

    fn walk<'a>(root: &'a Element, kinds: &[&str]) -> &'a Element {
        kinds.iter().fold(root, |node, kind| {
            characteristic(node, kind).unwrap_or_else(|| panic!("missing characteristic {kind}"))
        })
    }

    fn parm<'a>(parent: &'a Element, name: &str) -> Option<&'a Element> {
        parent
            .children()
            .iter()
            .find(|child| child.name == "parm" && child.attribute("name") == Some(name))
    }

    #[test]
    fn device_enrollment_profile() {
        let root = render(&device(DEVICE_ENROLLMENT), &Settings::default());
        assert_eq!(root.name, "wap-provisioningdoc");
        assert_eq!(root.attribute("version"), Some("1.1"));

        let identity = walk(&root, &["CertificateStore", "Root", "System", "IDENTITY"]);
        assert_eq!(
            parm(identity, "EncodedCertificate").and_then(|p| p.attribute("value")),
            Some(STANDARD.encode(b"identity").as_str())
        );
        let client = walk(&root, &["CertificateStore", "My", "System", "CLIENT"]);
        assert!(parm(client, "EncodedCertificate").is_some());
        walk(&root, &["CertificateStore", "My", "System", "PrivateKeyContainer"]);

        let renewal = walk(&root, &["Registry", r"HKLM\Security\MachineEnrollment"]);
        assert_eq!(
            parm(renewal, "RenewalPeriod").and_then(|p| p.attribute("value")),
            Some("14")
        );

        let application = walk(&root, &["APPLICATION"]);
        assert_eq!(
            parm(application, "ADDR").and_then(|p| p.attribute("value")),
            Some("https://mdm.acme.test/ManagementServer/MDM.svc")
        );
        let retry = parm(application, "BACKCOMPATRETRYDISABLED").unwrap();
        assert_eq!(retry.attribute("value"), None);
        assert_eq!(retry.attribute("datatype"), None);
        let auth_levels: Vec<_> = application
            .children()
            .iter()
            .filter(|child| child.attribute("type") == Some("APPAUTH"))
            .filter_map(|child| parm(child, "AAUTHLEVEL")?.attribute("value"))
            .collect();
        assert_eq!(auth_levels, vec!["CLIENT", "APPSRV"]);

        let provider = walk(&root, &["DMClient", "Provider", "WindowsMDMServer"]);
        assert_eq!(
            parm(provider, "HelpWebsite").and_then(|p| p.attribute("value")),
            Some("https://mdm.acme.test")
        );
        assert!(parm(provider, "HelpPhoneNumber").is_none());
        let poll = walk(provider, &["Poll"]);
        assert_eq!(
            parm(poll, "PollOnLogin").and_then(|p| p.attribute("datatype")),
            Some("boolean")
        );
        walk(provider, &["CustomEnrollmentCompletePage"]);
    }

    #[test]
    fn user_enrollment_profile() {
        let mut settings = Settings::default();
        settings.tenant.support_phone = Some("+1 555 0100".to_string());
        settings.tenant.support_website = Some("https://help.acme.test".to_string());

        let root = render(&device("Full"), &settings);
        walk(&root, &["CertificateStore", "My", "User", "CLIENT"]);
        assert!(characteristic(&root, "Registry").is_none());

        let provider = walk(&root, &["DMClient", "Provider", "WindowsMDMServer"]);
        assert_eq!(
            parm(provider, "HelpPhoneNumber").and_then(|p| p.attribute("value")),
            Some("+1 555 0100")
        );
        assert_eq!(
            parm(provider, "HelpWebsite").and_then(|p| p.attribute("value")),
            Some("https://help.acme.test")
        );
    }
}
