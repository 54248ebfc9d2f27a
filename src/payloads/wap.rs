use crate::soap::{XmlError, XmlWriter};

/// A `wap-provisioningdoc`, as consumed by the Windows configuration service providers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WapProvisioningDoc {
    pub version: &'static str,
    pub characteristics: Vec<Characteristic>,
}

/// A `characteristic` node. Parameters are written before nested characteristics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Characteristic {
    pub kind: String,
    pub parms: Vec<Parm>,
    pub characteristics: Vec<Characteristic>,
}

/// A `parm` leaf. Empty attributes are left off entirely.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Parm {
    pub name: String,
    pub value: String,
    pub datatype: &'static str,
}

impl Parm {
    /// A parameter without a declared type.
    pub fn untyped(name: &str, value: impl Into<String>) -> Self {
        Parm {
            name: name.to_string(),
            value: value.into(),
            datatype: "",
        }
    }

    /// A parameter whose presence alone is meaningful.
    pub fn flag(name: &str) -> Self {
        Parm::untyped(name, "")
    }

    pub fn string(name: &str, value: impl Into<String>) -> Self {
        Parm {
            datatype: "string",
            ..Parm::untyped(name, value)
        }
    }

    pub fn integer(name: &str, value: u64) -> Self {
        Parm {
            datatype: "integer",
            ..Parm::untyped(name, value.to_string())
        }
    }

    pub fn boolean(name: &str, value: bool) -> Self {
        Parm {
            datatype: "boolean",
            ..Parm::untyped(name, value.to_string())
        }
    }
}

impl Characteristic {
    pub fn new(kind: impl Into<String>) -> Self {
        Characteristic {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_parms(mut self, parms: impl IntoIterator<Item = Parm>) -> Self {
        self.parms.extend(parms);
        self
    }

    pub fn with_child(mut self, child: Characteristic) -> Self {
        self.characteristics.push(child);
        self
    }

    /// A chain of single-child characteristics, outermost first, ending in `leaf`.
    pub fn path(kinds: &[&str], leaf: Characteristic) -> Characteristic {
        kinds
            .iter()
            .rev()
            .fold(leaf, |inner, kind| Characteristic::new(*kind).with_child(inner))
    }

    fn write(&self, writer: &mut XmlWriter) -> Result<(), XmlError> {
        let attributes = non_empty(&[("type", self.kind.as_str())]);
        if self.parms.is_empty() && self.characteristics.is_empty() {
            return writer.empty("characteristic", &attributes);
        }

        writer.start("characteristic", &attributes)?;
        for parm in &self.parms {
            let attributes = non_empty(&[
                ("name", parm.name.as_str()),
                ("value", parm.value.as_str()),
                ("datatype", parm.datatype),
            ]);
            writer.empty("parm", &attributes)?;
        }
        for characteristic in &self.characteristics {
            characteristic.write(writer)?;
        }
        writer.end("characteristic")
    }
}

fn non_empty<'a>(attributes: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
    attributes
        .iter()
        .copied()
        .filter(|(_, value)| !value.is_empty())
        .collect()
}

impl WapProvisioningDoc {
    pub fn new(characteristics: Vec<Characteristic>) -> Self {
        WapProvisioningDoc {
            version: "1.1",
            characteristics,
        }
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, XmlError> {
        let mut writer = XmlWriter::new();
        writer.start("wap-provisioningdoc", &[("version", self.version)])?;
        for characteristic in &self.characteristics {
            characteristic.write(&mut writer)?;
        }
        writer.end("wap-provisioningdoc")?;
        Ok(writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omits_empty_attributes() {
        let document = WapProvisioningDoc::new(vec![
            Characteristic::new("APPLICATION").with_parms([
                Parm::untyped("APPID", "w7"),
                Parm::flag("BACKCOMPATRETRYDISABLED"),
                Parm::integer("CONNRETRYFREQ", 3),
            ]),
            Characteristic::new("PrivateKeyContainer"),
        ]);

        let xml = String::from_utf8(document.to_xml().unwrap()).unwrap();
        assert_eq!(
            xml,
            concat!(
                r#"<wap-provisioningdoc version="1.1">"#,
                r#"<characteristic type="APPLICATION">"#,
                r#"<parm name="APPID" value="w7"/>"#,
                r#"<parm name="BACKCOMPATRETRYDISABLED"/>"#,
                r#"<parm name="CONNRETRYFREQ" value="3" datatype="integer"/>"#,
                r#"</characteristic>"#,
                r#"<characteristic type="PrivateKeyContainer"/>"#,
                r#"</wap-provisioningdoc>"#,
            )
        );
    }

    #[test]
    fn builds_paths() {
        let leaf = Characteristic::new("leaf");
        let path = Characteristic::path(&["a", "b"], leaf.clone());
        assert_eq!(path.kind, "a");
        assert_eq!(path.characteristics[0].kind, "b");
        assert_eq!(path.characteristics[0].characteristics, vec![leaf]);
    }

    #[test]
    fn escapes_values() {
        let document = WapProvisioningDoc::new(vec![
            Characteristic::new("DMClient").with_parms([Parm::string("NAME", "Tom & \"Jerry\"")]),
        ]);
        let xml = String::from_utf8(document.to_xml().unwrap()).unwrap();
        assert!(xml.contains(r#"value="Tom &amp; &quot;Jerry&quot;""#));
    }
}
