use const_oid::{
    ObjectIdentifier,
    db::rfc4519::{CN, O},
};
use der::{
    Any,
    asn1::{SetOfVec, Utf8StringRef},
};
use x509_cert::{
    attr::AttributeTypeAndValue,
    name::{Name, RdnSequence, RelativeDistinguishedName},
};

/// Builds `O=<organization>, CN=<common name>`, omitting O when absent.
///
/// Values are encoded as UTF8String directly. Device IDs and email
/// addresses may hold characters that are special in RFC 4514 strings.
pub fn build_name(organization: Option<&str>, common_name: &str) -> der::Result<Name> {
    let mut rdns = Vec::with_capacity(2);
    if let Some(organization) = organization {
        rdns.push(single_attribute(O, organization)?);
    }
    rdns.push(single_attribute(CN, common_name)?);
    Ok(RdnSequence(rdns))
}

fn single_attribute(oid: ObjectIdentifier, value: &str) -> der::Result<RelativeDistinguishedName> {
    let value = Any::encode_from(&Utf8StringRef::new(value)?)?;
    let attributes = SetOfVec::try_from(vec![AttributeTypeAndValue { oid, value }])?;
    Ok(RelativeDistinguishedName(attributes))
}

/// The first common name within a name, if any.
pub fn common_name(name: &Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|attribute| attribute.oid == CN)
        .and_then(|attribute| String::from_utf8(attribute.value.value().to_vec()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_special_characters_intact() {
        let name = build_name(Some("Acme, Inc."), "oscar+mdm@acme.test").unwrap();
        assert_eq!(name.0.len(), 2);
        assert_eq!(common_name(&name).as_deref(), Some("oscar+mdm@acme.test"));
    }

    #[test]
    fn organization_is_optional() {
        let name = build_name(None, "device-1").unwrap();
        assert_eq!(name.0.len(), 1);
        assert_eq!(common_name(&name).as_deref(), Some("device-1"));
    }
}
