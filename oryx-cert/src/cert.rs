//! The `Certificate` value type and its associated small value types
//! (`KeyUsageBits`, `AlgoType`). Populated by [`crate::reader`].

use sha1::{Digest, Sha1};

use crate::attr::AttributeList;
use crate::dn::DistinguishedName;
use crate::validate::NameConstraints;

/// Public-key algorithm family, as derived from the key's OID — drives
/// which `extendedKeyUsage`/Netscape `certType` requirements apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AlgoType {
    #[default]
    Sign,
    Crypt,
    KeyAgreement,
}

/// The nine `keyUsage` bits (RFC 5280 §4.2.1.3), plus whether the
/// extension was present at all (`present`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyUsageBits {
    pub present: bool,
    pub digital_signature: bool,
    pub content_commitment: bool,
    pub key_encipherment: bool,
    pub data_encipherment: bool,
    pub key_agreement: bool,
    pub key_cert_sign: bool,
    pub crl_sign: bool,
    pub encipher_only: bool,
    pub decipher_only: bool,
}

impl KeyUsageBits {
    pub fn only_digital_signature() -> Self {
        KeyUsageBits {
            present: true,
            digital_signature: true,
            ..Default::default()
        }
    }

    pub fn only_key_encipherment() -> Self {
        KeyUsageBits {
            present: true,
            key_encipherment: true,
            ..Default::default()
        }
    }

    pub fn only_key_agreement() -> Self {
        KeyUsageBits {
            present: true,
            key_agreement: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.digital_signature
            || self.content_commitment
            || self.key_encipherment
            || self.data_encipherment
            || self.key_agreement
            || self.key_cert_sign
            || self.crl_sign
            || self.encipher_only
            || self.decipher_only)
    }

    pub fn intersects(&self, other: &KeyUsageBits) -> bool {
        (self.digital_signature && other.digital_signature)
            || (self.content_commitment && other.content_commitment)
            || (self.key_encipherment && other.key_encipherment)
            || (self.data_encipherment && other.data_encipherment)
            || (self.key_agreement && other.key_agreement)
            || (self.key_cert_sign && other.key_cert_sign)
            || (self.crl_sign && other.crl_sign)
    }

    pub fn union(&self, other: &KeyUsageBits) -> KeyUsageBits {
        KeyUsageBits {
            present: self.present || other.present,
            digital_signature: self.digital_signature || other.digital_signature,
            content_commitment: self.content_commitment || other.content_commitment,
            key_encipherment: self.key_encipherment || other.key_encipherment,
            data_encipherment: self.data_encipherment || other.data_encipherment,
            key_agreement: self.key_agreement || other.key_agreement,
            key_cert_sign: self.key_cert_sign || other.key_cert_sign,
            crl_sign: self.crl_sign || other.crl_sign,
            encipher_only: self.encipher_only || other.encipher_only,
            decipher_only: self.decipher_only || other.decipher_only,
        }
    }

    /// True if every bit set in `other` is also set in `self`.
    pub fn is_superset_of(&self, other: &KeyUsageBits) -> bool {
        (!other.digital_signature || self.digital_signature)
            && (!other.content_commitment || self.content_commitment)
            && (!other.key_encipherment || self.key_encipherment)
            && (!other.data_encipherment || self.data_encipherment)
            && (!other.key_agreement || self.key_agreement)
            && (!other.key_cert_sign || self.key_cert_sign)
            && (!other.crl_sign || self.crl_sign)
    }
}

/// One `subjectAltName` GeneralName, kept typed so name-constraint
/// enforcement can tell a dNSName from an rfc822Name instead of
/// matching both against the same string pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectAltName {
    Dns(String),
    Rfc822(String),
    Uri(String),
}

/// A decoded X.509 certificate. Validity times are Unix seconds.
#[derive(Clone, Debug)]
pub struct Certificate {
    pub version: u8,
    pub serial_number: Vec<u8>,
    pub not_before: i64,
    pub not_after: i64,
    pub issuer_dn: DistinguishedName,
    pub subject_dn: DistinguishedName,
    pub subject_public_key: Vec<u8>,
    pub algo_type: AlgoType,
    pub issuer_unique_id: Option<Vec<u8>>,
    pub subject_unique_id: Option<Vec<u8>>,
    pub extensions: AttributeList,
    pub key_usage: KeyUsageBits,
    pub ext_key_usage: Vec<String>,
    pub netscape_cert_type: Option<u8>,
    pub is_ca: bool,
    pub path_len_constraint: Option<u32>,
    pub path_kludge: bool,
    pub name_constraints: Option<NameConstraints>,
    pub policy_constraints: Option<()>,
    pub subject_alt_names: Vec<SubjectAltName>,
    pub self_signed: bool,
    /// SHA-1 of the raw encoded buffer, cached at read time (§4.17):
    /// the trust store and OCSP cert-ID computation both need it
    /// immediately, so it is not recomputed lazily.
    pub fingerprint_sha1: [u8; 20],
    pub raw: Vec<u8>,
}

impl Certificate {
    /// Computes and stores `fingerprint_sha1` from `raw`. Readers call
    /// this as the last construction step.
    pub fn finalize(mut self) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(&self.raw);
        let digest = hasher.finalize();
        self.fingerprint_sha1.copy_from_slice(&digest);
        self.self_signed = self.issuer_dn.byte_equal(&self.subject_dn);
        self
    }

    #[cfg(test)]
    pub fn new_for_test(subject_dn: DistinguishedName, issuer_dn: DistinguishedName) -> Self {
        let self_signed = issuer_dn.byte_equal(&subject_dn);
        Certificate {
            version: 3,
            serial_number: vec![1],
            not_before: 0,
            not_after: i64::MAX,
            issuer_dn,
            subject_dn,
            subject_public_key: vec![],
            algo_type: AlgoType::Sign,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: AttributeList::new(),
            key_usage: KeyUsageBits::default(),
            ext_key_usage: vec![],
            netscape_cert_type: None,
            is_ca: false,
            path_len_constraint: None,
            path_kludge: false,
            name_constraints: None,
            policy_constraints: None,
            subject_alt_names: vec![],
            self_signed,
            fingerprint_sha1: [0; 20],
            raw: vec![],
        }
    }
}

/// A Certificate Revocation List entry: serial number plus revocation time.
#[derive(Clone, Debug)]
pub struct CrlEntry {
    pub serial_number: Vec<u8>,
    pub revocation_time: i64,
}

/// A parsed CRL. Per §4.5, beyond `CRL_SORT_LIMIT` accumulated bytes new
/// entries are prepended without duplicate-checking rather than kept
/// sorted, trading correctness-under-duplicates for bounded insert cost
/// on very large lists.
pub const CRL_SORT_LIMIT: usize = 8192;

#[derive(Clone, Debug, Default)]
pub struct Crl {
    pub issuer_dn: Option<DistinguishedName>,
    pub this_update: i64,
    pub next_update: Option<i64>,
    pub entries: Vec<CrlEntry>,
    accumulated_bytes: usize,
}

impl Crl {
    pub fn add_entry(&mut self, entry: CrlEntry) {
        let entry_size = entry.serial_number.len() + 8;
        if self.accumulated_bytes > CRL_SORT_LIMIT {
            self.entries.insert(0, entry);
        } else {
            let pos = self
                .entries
                .partition_point(|e| e.serial_number < entry.serial_number);
            self.entries.insert(pos, entry);
        }
        self.accumulated_bytes += entry_size;
    }

    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        self.entries.iter().any(|e| e.serial_number == serial)
    }
}

/// OCSP `CertID` variants (RFC 6960 §4.1.1), as distinguished at read time.
#[derive(Clone, Debug)]
pub enum OcspCertId {
    /// v1 certID: opaque, cannot identify a certificate on its own.
    OpaqueV1,
    /// `[0]` explicit certificate, hashed with SHA-1 into a cert-id.
    ExplicitCertificate { hash: [u8; 20] },
    /// `[1]` certIdWithSig: issuerAndSerialNumber hashed as the issuer id.
    CertIdWithSig {
        issuer_name_hash: [u8; 20],
        serial_number: Vec<u8>,
    },
}
