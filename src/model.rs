#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    GB01,
    GB02, // TESTED
    GB03,
    GT01,
    MX05,
    MX06, // TESTED
    MX08,
    MX09,
    MX10,
    YT01,
}

impl Model {
    /// Identify a printer from its advertised BLE name.
    ///
    /// Some units append a suffix to the model (`MX06-3A1F`), so only the
    /// leading four characters are compared.
    pub fn from_name(name: &str) -> Option<Self> {
        let prefix = name.get(..4)?.to_ascii_uppercase();
        match prefix.as_str() {
            "GB01" => Some(Self::GB01),
            "GB02" => Some(Self::GB02),
            "GB03" => Some(Self::GB03),
            "GT01" => Some(Self::GT01),
            "MX05" => Some(Self::MX05),
            "MX06" => Some(Self::MX06),
            "MX08" => Some(Self::MX08),
            "MX09" => Some(Self::MX09),
            "MX10" => Some(Self::MX10),
            "YT01" => Some(Self::YT01),
            _ => None,
        }
    }

    /// Printable width in dots.
    pub fn pins(&self) -> u32 {
        // every known model has the same 48 byte head
        crate::PRINTER_WIDTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Model::from_name("GB02"), Some(Model::GB02));
        assert_eq!(Model::from_name("mx06-3A1F"), Some(Model::MX06));
        assert_eq!(Model::from_name("GB0"), None);
        assert_eq!(Model::from_name("QL-800"), None);
        assert_eq!(Model::from_name(""), None);
    }

    #[test]
    fn test_pins() {
        assert_eq!(Model::GB01.pins(), 384);
        assert_eq!(Model::MX10.pins(), 384);
    }
}
