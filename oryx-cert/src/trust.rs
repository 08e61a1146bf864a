//! A trust store bucketed by `checksum(subjectDN) mod 256`, matching the
//! shape of the original's hash-bucketed trust manager. The live
//! certificate and private key for a trust entry are materialized lazily
//! on first retrieval, so imported private-key material never lingers in
//! memory longer than necessary.

use crate::cert::Certificate;
use crate::dn::DistinguishedName;

const BUCKET_COUNT: usize = 256;

/// A simple additive checksum over a DN's canonical string form. Not
/// cryptographic — it only needs to spread entries across buckets.
fn checksum_dn(dn: &DistinguishedName) -> u8 {
    dn.to_string().bytes().fold(0u8, |acc, b| acc.wrapping_add(b))
}

#[derive(Clone, Debug)]
pub struct TrustEntry {
    pub subject_checksum: u8,
    pub subject_sha1: [u8; 20],
    pub subject_key_id_checksum: Option<u8>,
    pub subject_key_id_sha1: Option<[u8; 20]>,
    pub encoded: Vec<u8>,
    pub subject_dn: DistinguishedName,
    live_cert: Option<Certificate>,
}

impl TrustEntry {
    pub fn from_certificate(cert: &Certificate) -> Self {
        TrustEntry {
            subject_checksum: checksum_dn(&cert.subject_dn),
            subject_sha1: cert.fingerprint_sha1,
            subject_key_id_checksum: None,
            subject_key_id_sha1: None,
            encoded: cert.raw.clone(),
            subject_dn: cert.subject_dn.clone(),
            live_cert: None,
        }
    }

    /// Materializes the live certificate the first time it's needed,
    /// caching it for subsequent calls.
    pub fn materialize(&mut self, reader: impl FnOnce(&[u8]) -> Option<Certificate>) -> Option<&Certificate> {
        if self.live_cert.is_none() {
            self.live_cert = reader(&self.encoded);
        }
        self.live_cert.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct TrustStore {
    buckets: Vec<Vec<TrustEntry>>,
    implicitly_trusted: Vec<[u8; 20]>,
}

impl TrustStore {
    pub fn new() -> Self {
        TrustStore {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
            implicitly_trusted: Vec::new(),
        }
    }

    pub fn add_trust_entry(&mut self, cert: &Certificate) {
        let entry = TrustEntry::from_certificate(cert);
        let bucket = entry.subject_checksum as usize;
        self.buckets[bucket].push(entry);
    }

    /// Marks `cert`'s fingerprint as trusted without requiring chain
    /// validation at all (e.g. pinned leaf certificates).
    pub fn trust_implicitly(&mut self, cert: &Certificate) {
        self.implicitly_trusted.push(cert.fingerprint_sha1);
    }

    pub fn is_implicitly_trusted(&self, cert: &Certificate) -> bool {
        self.implicitly_trusted.contains(&cert.fingerprint_sha1)
    }

    /// Finds a trust entry for `cert`: if `want_issuer` and `cert` is
    /// self-signed, returns `None` immediately (looking for its own
    /// issuer would loop back to itself). Otherwise hashes the subject
    /// (or issuer) DN, scans the matching bucket, and tie-breaks on full
    /// byte-equality.
    pub fn find_trust_entry(&self, cert: &Certificate, want_issuer: bool) -> Option<&TrustEntry> {
        if want_issuer && cert.self_signed {
            return None;
        }
        let query_dn = if want_issuer {
            &cert.issuer_dn
        } else {
            &cert.subject_dn
        };
        let bucket = checksum_dn(query_dn) as usize;
        self.buckets[bucket]
            .iter()
            .find(|entry| entry.subject_dn.byte_equal(query_dn))
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::{AttributeType, Rdn};

    fn cert_with_cn(cn: &str, self_signed: bool) -> Certificate {
        let mut subject = DistinguishedName::new();
        subject.push(Rdn::single(AttributeType::CommonName, cn));
        let issuer = if self_signed {
            subject.clone()
        } else {
            let mut i = DistinguishedName::new();
            i.push(Rdn::single(AttributeType::CommonName, "someone-else"));
            i
        };
        Certificate::new_for_test(subject, issuer).finalize()
    }

    #[test]
    fn find_trust_entry_by_subject() {
        let mut store = TrustStore::new();
        let ca = cert_with_cn("root-ca", true);
        store.add_trust_entry(&ca);

        let found = store.find_trust_entry(&ca, false);
        assert!(found.is_some());
    }

    #[test]
    fn self_signed_cert_has_no_issuer_trust_entry() {
        let store = TrustStore::new();
        let ca = cert_with_cn("root-ca", true);
        assert!(store.find_trust_entry(&ca, true).is_none());
    }

    #[test]
    fn bucket_spread_does_not_lose_entries() {
        let mut store = TrustStore::new();
        for i in 0..300 {
            let cert = cert_with_cn(&format!("ca-{i}"), true);
            store.add_trust_entry(&cert);
        }
        assert_eq!(store.len(), 300);
    }
}
