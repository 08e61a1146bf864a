//! Distinguished Names: ordered RDN lists with X.500 sort order, ISO-3166
//! country validation, and the byte/substring comparison rules chain
//! validation relies on for issuer/subject chaining.
//!
//! RFC 4514 string parsing/printing is a collaborator's job (out of scope
//! per the component boundary); this module only owns the data structure
//! and its comparison semantics.

use std::fmt;

/// Known attribute types get a fixed X.500 sort priority; everything else
/// is assigned a synthetic id above [`SYNTHETIC_ID_BASE`] in the order it
/// was first seen, so unknown attributes sort after known ones but keep
/// their relative wire order.
const SYNTHETIC_ID_BASE: u32 = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttributeType {
    CountryName,
    StateOrProvince,
    Locality,
    Organization,
    OrganizationalUnit,
    CommonName,
    /// Unrecognized attribute type, identified by its dotted OID string.
    Other(String),
}

impl AttributeType {
    fn fixed_priority(&self) -> Option<u32> {
        Some(match self {
            AttributeType::CountryName => 0,
            AttributeType::StateOrProvince => 1,
            AttributeType::Locality => 2,
            AttributeType::Organization => 3,
            AttributeType::OrganizationalUnit => 4,
            AttributeType::CommonName => 5,
            AttributeType::Other(_) => return None,
        })
    }
}

/// A single attribute-type/value pair within an RDN.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeTypeAndValue {
    pub attr_type: AttributeType,
    pub value: String,
}

/// A (possibly multi-valued) relative distinguished name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rdn {
    pub values: Vec<AttributeTypeAndValue>,
}

impl Rdn {
    pub fn single(attr_type: AttributeType, value: impl Into<String>) -> Self {
        Rdn {
            values: vec![AttributeTypeAndValue {
                attr_type,
                value: value.into(),
            }],
        }
    }

    fn canonical(&self) -> String {
        let mut parts: Vec<String> = self
            .values
            .iter()
            .map(|v| format!("{:?}={}", v.attr_type, collapse_whitespace(&v.value)))
            .collect();
        parts.sort();
        parts.join("+")
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An ordered list of RDNs, most significant first (as encountered on the
/// wire — this repository does not reverse RDN order the way some LDAP
/// string forms do).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    rdns: Vec<Rdn>,
    /// Synthetic ids assigned to `Other` attribute types, in first-seen
    /// order, so re-insertion of the same unknown OID reuses its id.
    synthetic: Vec<String>,
    /// Byte-preserved wire encoding, when the DN was read rather than
    /// built programmatically. Enables the byte-equal fast path.
    raw: Option<Vec<u8>>,
}

impl DistinguishedName {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw(raw: Vec<u8>, rdns: Vec<Rdn>) -> Self {
        let mut dn = DistinguishedName {
            rdns: Vec::new(),
            synthetic: Vec::new(),
            raw: Some(raw),
        };
        for r in rdns {
            dn.push(r);
        }
        dn
    }

    /// Appends an RDN, assigning synthetic priorities to any unknown
    /// attribute types it introduces and normalizing `"UK"` country codes
    /// to `"GB"`.
    pub fn push(&mut self, mut rdn: Rdn) {
        for atv in &mut rdn.values {
            if let AttributeType::CountryName = atv.attr_type {
                if atv.value.eq_ignore_ascii_case("UK") {
                    atv.value = "GB".to_string();
                }
            }
            if let AttributeType::Other(oid) = &atv.attr_type {
                if !self.synthetic.contains(oid) {
                    self.synthetic.push(oid.clone());
                }
            }
        }
        self.raw = None;
        self.rdns.push(rdn);
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Sort priority of an attribute type within this DN: fixed for the
    /// known `c, st, l, o, ou, cn` types, else `SYNTHETIC_ID_BASE + rank`
    /// where `rank` is the order the OID was first seen in this DN.
    pub fn priority_of(&self, attr_type: &AttributeType) -> u32 {
        match attr_type.fixed_priority() {
            Some(p) => p,
            None => {
                if let AttributeType::Other(oid) = attr_type {
                    let rank = self
                        .synthetic
                        .iter()
                        .position(|o| o == oid)
                        .unwrap_or(self.synthetic.len()) as u32;
                    SYNTHETIC_ID_BASE + rank
                } else {
                    SYNTHETIC_ID_BASE
                }
            }
        }
    }

    /// Byte-equal after collapsing whitespace in each value, per raw
    /// encoding when both sides have one, falling back to structural
    /// comparison otherwise.
    pub fn byte_equal(&self, other: &DistinguishedName) -> bool {
        match (&self.raw, &other.raw) {
            (Some(a), Some(b)) => a == b,
            _ => self.structural_eq(other),
        }
    }

    fn structural_eq(&self, other: &DistinguishedName) -> bool {
        if self.rdns.len() != other.rdns.len() {
            return false;
        }
        self.rdns
            .iter()
            .zip(other.rdns.iter())
            .all(|(a, b)| a.canonical() == b.canonical())
    }

    /// True if `self` is a suffix of `other`: walking RDNs in order, the
    /// shorter DN's RDNs must match the tail of the longer one.
    pub fn is_suffix_of(&self, other: &DistinguishedName) -> bool {
        if self.rdns.len() > other.rdns.len() {
            return false;
        }
        let offset = other.rdns.len() - self.rdns.len();
        self.rdns
            .iter()
            .zip(other.rdns[offset..].iter())
            .all(|(a, b)| a.canonical() == b.canonical())
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.rdns.iter().map(|r| r.canonical()).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// ISO 3166-1 alpha-2 codes accepted for a `CountryName` attribute value.
/// Not exhaustive of the full standard; covers the codes this deployment
/// has actually observed plus the common ones.
pub const ISO_3166_ALPHA2: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AR", "AT", "AU", "AW", "AZ", "BA", "BB", "BD",
    "BE", "BF", "BG", "BH", "BI", "BJ", "BN", "BO", "BR", "BS", "BT", "BW", "BY", "BZ", "CA", "CD",
    "CF", "CG", "CH", "CI", "CL", "CM", "CN", "CO", "CR", "CU", "CV", "CY", "CZ", "DE", "DJ", "DK",
    "DM", "DO", "DZ", "EC", "EE", "EG", "ER", "ES", "ET", "FI", "FJ", "FM", "FR", "GA", "GB", "GD",
    "GE", "GH", "GM", "GN", "GQ", "GR", "GT", "GW", "GY", "HK", "HN", "HR", "HT", "HU", "ID", "IE",
    "IL", "IN", "IQ", "IR", "IS", "IT", "JM", "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN", "KP",
    "KR", "KW", "KZ", "LA", "LB", "LC", "LI", "LK", "LR", "LS", "LT", "LU", "LV", "LY", "MA", "MC",
    "MD", "ME", "MG", "MH", "MK", "ML", "MM", "MN", "MR", "MT", "MU", "MV", "MW", "MX", "MY", "MZ",
    "NA", "NE", "NG", "NI", "NL", "NO", "NP", "NR", "NZ", "OM", "PA", "PE", "PG", "PH", "PK", "PL",
    "PT", "PW", "PY", "QA", "RO", "RS", "RU", "RW", "SA", "SB", "SC", "SD", "SE", "SG", "SI", "SK",
    "SL", "SM", "SN", "SO", "SR", "SS", "ST", "SV", "SY", "SZ", "TD", "TG", "TH", "TJ", "TL", "TM",
    "TN", "TO", "TR", "TT", "TV", "TW", "TZ", "UA", "UG", "US", "UY", "UZ", "VA", "VC", "VE", "VN",
    "VU", "WS", "YE", "ZA", "ZM", "ZW",
];

pub fn is_valid_country_code(code: &str) -> bool {
    let upper = code.to_ascii_uppercase();
    upper == "GB" || upper.eq_ignore_ascii_case("UK") || ISO_3166_ALPHA2.contains(&upper.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uk_canonicalizes_to_gb() {
        let mut dn = DistinguishedName::new();
        dn.push(Rdn::single(AttributeType::CountryName, "UK"));
        assert_eq!(dn.rdns()[0].values[0].value, "GB");
    }

    #[test]
    fn unknown_oid_gets_synthetic_priority_above_known() {
        let mut dn = DistinguishedName::new();
        dn.push(Rdn::single(AttributeType::CommonName, "example"));
        dn.push(Rdn::single(
            AttributeType::Other("1.2.3.4".to_string()),
            "x",
        ));
        assert!(
            dn.priority_of(&AttributeType::Other("1.2.3.4".to_string()))
                > dn.priority_of(&AttributeType::CommonName)
        );
    }

    #[test]
    fn suffix_match() {
        let mut short = DistinguishedName::new();
        short.push(Rdn::single(AttributeType::Organization, "Example Corp"));
        short.push(Rdn::single(AttributeType::CommonName, "ca.example.com"));

        let mut long = DistinguishedName::new();
        long.push(Rdn::single(AttributeType::CountryName, "FR"));
        long.push(Rdn::single(AttributeType::Organization, "Example Corp"));
        long.push(Rdn::single(AttributeType::CommonName, "ca.example.com"));

        assert!(short.is_suffix_of(&long));
        assert!(!long.is_suffix_of(&short));
    }

    #[test]
    fn byte_equal_prefers_raw() {
        let a = DistinguishedName::from_raw(vec![1, 2, 3], vec![]);
        let b = DistinguishedName::from_raw(vec![1, 2, 3], vec![]);
        let c = DistinguishedName::from_raw(vec![9], vec![]);
        assert!(a.byte_equal(&b));
        assert!(!a.byte_equal(&c));
    }

    #[test]
    fn country_code_validation() {
        assert!(is_valid_country_code("FR"));
        assert!(is_valid_country_code("UK"));
        assert!(!is_valid_country_code("ZZ"));
    }
}
