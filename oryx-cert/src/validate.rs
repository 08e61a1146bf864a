//! Certificate chain validation at one of five compliance levels, with
//! constraint propagation during a single forward walk from the trust
//! anchor down to the leaf.

use crate::cert::{Certificate, SubjectAltName};
use crate::dn::DistinguishedName;
use crate::key_usage;
use crate::trust::TrustStore;

/// Compliance levels, each strictly a superset of checks over the
/// previous one. Ordered so `level as u8` comparisons work for the
/// encoding table's `min_compliance` gating in [`crate::attr`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ComplianceLevel {
    Oblivious = 0,
    Reduced = 1,
    Standard = 2,
    PkixPartial = 3,
    PkixFull = 4,
}

/// Which field or extension a validation failure is attributed to.
pub type FieldId = &'static str;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertErrorKind {
    AttrAbsent,
    AttrPresent,
    AttrValue,
    AttrSize,
    Constraint,
    IssuerConstraint,
    TrustedUsage,
    TrustedImplicit,
    CertificateBroken,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("certificate[{cert_index}] {locus}: {kind:?}")]
pub struct CertError {
    pub locus: FieldId,
    pub kind: CertErrorKind,
    pub cert_index: usize,
}

/// Required usage for a (subject, issuer) pairing: `keyCertSign` when the
/// issuer is signing a certificate, `crlSign` when signing a CRL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequiredUsage {
    CertSign,
    CrlSign,
}

/// Validates a single (subject, issuer) pair at `level`. Each arm below
/// corresponds to one bullet of the component design; higher levels run
/// every check of the levels below them.
pub fn validate_pair(
    subject: &Certificate,
    issuer: &Certificate,
    level: ComplianceLevel,
    usage: RequiredUsage,
    now: i64,
    cert_index: usize,
) -> Result<(), CertError> {
    // Universal.
    let issuer_usage_ok = match usage {
        RequiredUsage::CertSign => issuer.key_usage.key_cert_sign,
        RequiredUsage::CrlSign => issuer.key_usage.crl_sign,
    };
    if issuer.key_usage.present && !issuer_usage_ok {
        return Err(CertError {
            locus: "issuer.keyUsage",
            kind: CertErrorKind::TrustedUsage,
            cert_index,
        });
    }

    if level >= ComplianceLevel::Reduced {
        if subject.not_before >= subject.not_after {
            return Err(CertError {
                locus: "validity",
                kind: CertErrorKind::AttrValue,
                cert_index,
            });
        }
        if now < subject.not_before || now > subject.not_after {
            return Err(CertError {
                locus: "validity",
                kind: CertErrorKind::Constraint,
                cert_index,
            });
        }
    }

    if level >= ComplianceLevel::Standard {
        let chains = subject.issuer_dn.byte_equal(&issuer.subject_dn)
            || dn_structurally_equal(&subject.issuer_dn, &issuer.subject_dn);
        if !chains {
            return Err(CertError {
                locus: "issuerDN",
                kind: CertErrorKind::Constraint,
                cert_index,
            });
        }
        if issuer.version >= 3 && !(issuer.key_usage.key_cert_sign && issuer.is_ca) {
            return Err(CertError {
                locus: "basicConstraints",
                kind: CertErrorKind::IssuerConstraint,
                cert_index,
            });
        }
        key_usage::check_consistency(subject).map_err(|kind| CertError {
            locus: "extKeyUsage",
            kind,
            cert_index,
        })?;
    }

    if level >= ComplianceLevel::PkixPartial {
        if !subject.is_ca
            && (subject.name_constraints.is_some() || subject.policy_constraints.is_some())
        {
            return Err(CertError {
                locus: "nameConstraints",
                kind: CertErrorKind::AttrPresent,
                cert_index,
            });
        }
        if let Some(0) = issuer.path_len_constraint {
            if subject.is_ca {
                return Err(CertError {
                    locus: "pathLenConstraint",
                    kind: CertErrorKind::Constraint,
                    cert_index,
                });
            }
        }
    }

    if level >= ComplianceLevel::PkixFull {
        if let Some(nc) = &issuer.name_constraints {
            if let Err(violation) = nc.check(&subject.subject_dn, &subject.subject_alt_names) {
                return Err(CertError {
                    locus: violation.locus(),
                    kind: CertErrorKind::Constraint,
                    cert_index,
                });
            }
        }
    }

    Ok(())
}

fn dn_structurally_equal(a: &DistinguishedName, b: &DistinguishedName) -> bool {
    a.to_string() == b.to_string()
}

/// Which part of the subject a name-constraint violation was found in.
/// `validate_pair` maps this to the error locus: altName violations are
/// attributed to `subjectAltName`, DN subtree violations stay under
/// `nameConstraints`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintViolation {
    SubjectDn,
    SubjectAltName,
}

impl ConstraintViolation {
    fn locus(&self) -> FieldId {
        match self {
            ConstraintViolation::SubjectDn => "nameConstraints",
            ConstraintViolation::SubjectAltName => "subjectAltName",
        }
    }
}

/// Name-constraint set: permitted/excluded subtrees for the subject DN
/// and for altName forms (`rfc822`, `dns`). A wildcard leading `.` in a
/// `dns` subtree matches any subdomain, per the usual PKIX convention;
/// an `rfc822` subtree without an `@` constrains the mailbox's host part
/// the same way, per RFC 5280 §4.2.1.10.
#[derive(Clone, Debug, Default)]
pub struct NameConstraints {
    pub permitted_dn: Vec<DistinguishedName>,
    pub excluded_dn: Vec<DistinguishedName>,
    pub permitted_dns: Vec<String>,
    pub excluded_dns: Vec<String>,
    pub permitted_rfc822: Vec<String>,
    pub excluded_rfc822: Vec<String>,
}

impl NameConstraints {
    /// Checks `subject_dn` against the DN subtrees and `alt_names`
    /// against the dns/rfc822 subtrees. PKIX-Full enforces both forms
    /// (RFC 5280 §4.2.1.10), not altNames alone.
    pub fn check(
        &self,
        subject_dn: &DistinguishedName,
        alt_names: &[SubjectAltName],
    ) -> Result<(), ConstraintViolation> {
        if self.excluded_dn.iter().any(|sub| sub.is_suffix_of(subject_dn)) {
            return Err(ConstraintViolation::SubjectDn);
        }
        if !self.permitted_dn.is_empty()
            && !self.permitted_dn.iter().any(|sub| sub.is_suffix_of(subject_dn))
        {
            return Err(ConstraintViolation::SubjectDn);
        }

        let dns_names: Vec<&str> = alt_names
            .iter()
            .filter_map(|n| match n {
                SubjectAltName::Dns(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        if self
            .excluded_dns
            .iter()
            .any(|excl| dns_names.iter().any(|n| matches_dns_subtree(n, excl)))
        {
            return Err(ConstraintViolation::SubjectAltName);
        }
        if !self.permitted_dns.is_empty()
            && !dns_names
                .iter()
                .all(|n| self.permitted_dns.iter().any(|p| matches_dns_subtree(n, p)))
        {
            return Err(ConstraintViolation::SubjectAltName);
        }

        let rfc822_names: Vec<&str> = alt_names
            .iter()
            .filter_map(|n| match n {
                SubjectAltName::Rfc822(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        if self
            .excluded_rfc822
            .iter()
            .any(|excl| rfc822_names.iter().any(|n| matches_rfc822_subtree(n, excl)))
        {
            return Err(ConstraintViolation::SubjectAltName);
        }
        if !self.permitted_rfc822.is_empty()
            && !rfc822_names
                .iter()
                .all(|n| self.permitted_rfc822.iter().any(|p| matches_rfc822_subtree(n, p)))
        {
            return Err(ConstraintViolation::SubjectAltName);
        }

        Ok(())
    }
}

fn matches_dns_subtree(name: &str, subtree: &str) -> bool {
    let subtree = subtree.trim_start_matches('.');
    name.eq_ignore_ascii_case(subtree) || name.to_ascii_lowercase().ends_with(&format!(".{}", subtree.to_ascii_lowercase()))
}

/// Matches a mailbox against an rfc822 constraint, which is either a full
/// mailbox (`alice@example.com`, exact match), a host (`example.com`,
/// matches any mailbox at that host or a subdomain of it), or a bare
/// domain prefixed with `@` (same as a host constraint).
fn matches_rfc822_subtree(mailbox: &str, subtree: &str) -> bool {
    if subtree.contains('@') {
        return mailbox.eq_ignore_ascii_case(subtree);
    }
    match mailbox.rsplit_once('@') {
        Some((_, host)) => matches_dns_subtree(host, subtree),
        None => false,
    }
}

/// Counters carried down a chain walk per PKIX §6.1.2/§6.1.4: policy
/// counters decrement for every certificate including PATHKLUDGE-flagged
/// ones, but the path-length counter skips PATHKLUDGE certs (this spec's
/// resolution of the open path-kludge question, see DESIGN.md).
#[derive(Clone, Copy, Debug)]
pub struct ConstraintCounters {
    pub require_explicit_policy: Option<u32>,
    pub inhibit_policy_mapping: Option<u32>,
    pub inhibit_any_policy: Option<u32>,
    pub max_path_length: Option<u32>,
}

impl ConstraintCounters {
    pub fn advance(&mut self, cert: &Certificate) -> Result<(), CertError> {
        for counter in [
            &mut self.require_explicit_policy,
            &mut self.inhibit_policy_mapping,
            &mut self.inhibit_any_policy,
        ] {
            if let Some(v) = counter {
                *counter = Some(v.saturating_sub(1));
            }
        }
        if !cert.path_kludge {
            if let Some(v) = &mut self.max_path_length {
                if *v == 0 {
                    return Err(CertError {
                        locus: "pathLenConstraint",
                        kind: CertErrorKind::Constraint,
                        cert_index: 0,
                    });
                }
                *v -= 1;
            }
        }
        Ok(())
    }
}

/// Walks a chain (leaf first) against `store`, checking each
/// (descendant, ancestor) pair and a trust anchor at the top. Distinguishes
/// "self-signed but untrusted" from "broken chain" per the component
/// design's anchor-discovery rule.
pub fn check_cert_chain(
    chain: &[Certificate],
    store: &TrustStore,
    level: ComplianceLevel,
    now: i64,
) -> Result<(), CertError> {
    if chain.is_empty() {
        return Err(CertError {
            locus: "chain",
            kind: CertErrorKind::AttrAbsent,
            cert_index: 0,
        });
    }

    if store.is_implicitly_trusted(&chain[0]) {
        return Ok(());
    }

    let mut anchor_index = None;
    for (i, cert) in chain.iter().enumerate() {
        if store.find_trust_entry(cert, true).is_some() {
            anchor_index = Some(i);
            break;
        }
    }

    let Some(anchor_index) = anchor_index else {
        let top = chain.last().unwrap();
        if top.self_signed {
            tracing::debug!(cert.locus = "trustAnchor", "self-signed root not in trust store");
            return Err(CertError {
                locus: "trustAnchor",
                kind: CertErrorKind::TrustedImplicit,
                cert_index: chain.len() - 1,
            });
        }
        tracing::debug!(cert.locus = "trustAnchor", "chain does not reach a trust anchor");
        return Err(CertError {
            locus: "trustAnchor",
            kind: CertErrorKind::CertificateBroken,
            cert_index: chain.len() - 1,
        });
    };

    let mut counters = ConstraintCounters {
        require_explicit_policy: None,
        inhibit_policy_mapping: None,
        inhibit_any_policy: None,
        max_path_length: None,
    };

    for idx in (0..=anchor_index).rev() {
        let subject = &chain[idx];
        let issuer = if idx + 1 <= anchor_index {
            &chain[idx + 1]
        } else {
            subject
        };
        validate_pair(subject, issuer, level, RequiredUsage::CertSign, now, idx)?;
        if level >= ComplianceLevel::PkixPartial {
            counters.advance(subject).map_err(|mut e| {
                e.cert_index = idx;
                e
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{Certificate, KeyUsageBits, SubjectAltName};
    use crate::dn::{AttributeType, DistinguishedName, Rdn};

    fn leaf_and_issuer() -> (Certificate, Certificate) {
        let mut issuer_dn = DistinguishedName::new();
        issuer_dn.push(Rdn::single(AttributeType::CommonName, "ca.example.com"));

        let mut subject_dn = DistinguishedName::new();
        subject_dn.push(Rdn::single(AttributeType::CommonName, "leaf.example.com"));

        let mut issuer = Certificate::new_for_test(issuer_dn.clone(), issuer_dn.clone());
        issuer.is_ca = true;
        issuer.version = 3;
        issuer.key_usage = KeyUsageBits {
            present: true,
            key_cert_sign: true,
            crl_sign: true,
            ..Default::default()
        };

        let mut leaf = Certificate::new_for_test(subject_dn, issuer_dn);
        leaf.not_before = 0;
        leaf.not_after = 100;

        (leaf, issuer)
    }

    #[test]
    fn rejects_issuer_not_trusted_for_cert_sign() {
        let (subject, mut issuer) = leaf_and_issuer();
        issuer.key_usage.present = true;
        issuer.key_usage.key_cert_sign = false;
        let err = validate_pair(
            &subject,
            &issuer,
            ComplianceLevel::Oblivious,
            RequiredUsage::CertSign,
            50,
            0,
        )
        .unwrap_err();
        assert_eq!(err.kind, CertErrorKind::TrustedUsage);
    }

    #[test]
    fn standard_level_checks_name_chaining() {
        let (mut subject, issuer) = leaf_and_issuer();
        let mut wrong = DistinguishedName::new();
        wrong.push(Rdn::single(AttributeType::CommonName, "someone-else.example.com"));
        subject.issuer_dn = wrong;
        let err = validate_pair(
            &subject,
            &issuer,
            ComplianceLevel::Standard,
            RequiredUsage::CertSign,
            50,
            0,
        )
        .unwrap_err();
        assert_eq!(err.locus, "issuerDN");
    }

    #[test]
    fn validity_window_enforced_at_reduced() {
        let (mut subject, issuer) = leaf_and_issuer();
        subject.not_after = 10;
        let err = validate_pair(
            &subject,
            &issuer,
            ComplianceLevel::Reduced,
            RequiredUsage::CertSign,
            50,
            0,
        )
        .unwrap_err();
        assert_eq!(err.locus, "validity");
    }

    #[test]
    fn path_kludge_exempt_from_path_length_not_policy() {
        let (mut subject, _issuer) = leaf_and_issuer();
        subject.path_kludge = true;
        let mut counters = ConstraintCounters {
            require_explicit_policy: Some(0),
            inhibit_policy_mapping: None,
            inhibit_any_policy: None,
            max_path_length: Some(0),
        };
        // Path length must NOT trip despite being at 0, because of path-kludge.
        assert!(counters.advance(&subject).is_ok());
        // But policy counters keep decrementing (saturating at 0).
        assert_eq!(counters.require_explicit_policy, Some(0));
    }

    #[test]
    fn name_constraint_permits_matching_dns_subdomain() {
        let nc = NameConstraints {
            permitted_dns: vec!["example.com".to_string()],
            ..Default::default()
        };
        let subject_dn = DistinguishedName::new();
        let alt = [SubjectAltName::Dns("foo.example.com".to_string())];
        assert!(nc.check(&subject_dn, &alt).is_ok());
    }

    #[test]
    fn name_constraint_rejects_dns_outside_permitted_subtree_with_altname_locus() {
        let (subject, mut issuer) = leaf_and_issuer();
        issuer.name_constraints = Some(NameConstraints {
            permitted_dns: vec!["example.com".to_string()],
            ..Default::default()
        });
        let mut subject = subject;
        subject.subject_alt_names = vec![SubjectAltName::Dns("foo.example.org".to_string())];

        let err = validate_pair(
            &subject,
            &issuer,
            ComplianceLevel::PkixFull,
            RequiredUsage::CertSign,
            50,
            0,
        )
        .unwrap_err();
        assert_eq!(err.locus, "subjectAltName");
        assert_eq!(err.kind, CertErrorKind::Constraint);
    }

    #[test]
    fn name_constraint_rejects_subject_dn_outside_permitted_subtree() {
        let (mut subject, mut issuer) = leaf_and_issuer();
        let mut allowed_root = DistinguishedName::new();
        allowed_root.push(Rdn::single(AttributeType::Organization, "Allowed Co"));
        issuer.name_constraints = Some(NameConstraints {
            permitted_dn: vec![allowed_root],
            ..Default::default()
        });
        subject.subject_dn = {
            let mut dn = DistinguishedName::new();
            dn.push(Rdn::single(AttributeType::Organization, "Someone Else"));
            dn
        };

        let err = validate_pair(
            &subject,
            &issuer,
            ComplianceLevel::PkixFull,
            RequiredUsage::CertSign,
            50,
            0,
        )
        .unwrap_err();
        assert_eq!(err.locus, "nameConstraints");
        assert_eq!(err.kind, CertErrorKind::Constraint);
    }
}
