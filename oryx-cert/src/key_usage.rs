//! Key-usage consistency checking: deriving the allowed `keyUsage` bits
//! from a public key's algorithm type and from the `extendedKeyUsage`/
//! Netscape `certType` extensions, then checking the certificate's actual
//! `keyUsage` is consistent with what those extensions imply.

use crate::cert::{AlgoType, Certificate, KeyUsageBits};
use crate::validate::CertErrorKind;

/// `extendedKeyUsage` OID -> keyUsage bits required of a key of that
/// algorithm type. Only the well-known PKIX usages are tabulated; unknown
/// OIDs impose no additional keyUsage requirement.
fn ext_key_usage_requirement(oid: &str, algo: AlgoType) -> Option<KeyUsageBits> {
    let bits = match (oid, algo) {
        ("1.3.6.1.5.5.7.3.1", AlgoType::Sign) => KeyUsageBits::only_digital_signature(),
        ("1.3.6.1.5.5.7.3.1", AlgoType::Crypt) => KeyUsageBits::only_key_encipherment(),
        ("1.3.6.1.5.5.7.3.1", AlgoType::KeyAgreement) => KeyUsageBits::only_key_agreement(),
        ("1.3.6.1.5.5.7.3.2", AlgoType::Sign) => KeyUsageBits::only_digital_signature(),
        ("1.3.6.1.5.5.7.3.4", AlgoType::Sign) => KeyUsageBits::only_digital_signature(),
        ("1.3.6.1.5.5.7.3.4", AlgoType::Crypt) => KeyUsageBits::only_key_encipherment(),
        _ => return None,
    };
    Some(bits)
}

/// Netscape `certType` bit -> keyUsage bits it asserts.
fn netscape_cert_type_requirement(bit: u8) -> KeyUsageBits {
    match bit {
        // sslServer / sslClient
        0x80 | 0x40 => KeyUsageBits {
            present: true,
            digital_signature: true,
            key_encipherment: true,
            ..Default::default()
        },
        // sslCA
        0x04 => KeyUsageBits {
            present: true,
            key_cert_sign: true,
            crl_sign: true,
            ..Default::default()
        },
        _ => KeyUsageBits::default(),
    }
}

/// Checks the certificate's asserted `keyUsage` is a superset of what its
/// `extendedKeyUsage` / Netscape `certType` extensions require, and that
/// `encipherOnly`/`decipherOnly` are not both set.
pub fn check_consistency(cert: &Certificate) -> Result<(), CertErrorKind> {
    let ku = &cert.key_usage;

    if ku.encipher_only && ku.decipher_only {
        return Err(CertErrorKind::Constraint);
    }

    let mut required = KeyUsageBits::default();
    let mut any_ext_asserted = false;

    for oid in &cert.ext_key_usage {
        any_ext_asserted = true;
        if let Some(req) = ext_key_usage_requirement(oid, cert.algo_type) {
            if !req.intersects(ku) {
                return Err(CertErrorKind::Constraint);
            }
            required = required.union(&req);
        }
    }

    if let Some(cert_type) = cert.netscape_cert_type {
        any_ext_asserted = true;
        for bit in [0x80u8, 0x40, 0x04] {
            if cert_type & bit != 0 {
                let req = netscape_cert_type_requirement(bit);
                required = required.union(&req);
            }
        }
    }

    // §4.7: "for freshly-generated unsigned certs, treat both as
    // implicitly critical" — not reachable from a read-only validator,
    // since this crate only validates signed, encoded certificates; both
    // extensions are always treated as critical for the superset check
    // below when ext usage was asserted at all.
    if any_ext_asserted && !required.is_empty() && !ku.is_superset_of(&required) {
        return Err(CertErrorKind::Constraint);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::Certificate;
    use crate::dn::DistinguishedName;

    fn cert_with(algo: AlgoType) -> Certificate {
        let mut c = Certificate::new_for_test(DistinguishedName::new(), DistinguishedName::new());
        c.algo_type = algo;
        c
    }

    #[test]
    fn server_auth_requires_digital_signature_on_sign_key() {
        let mut c = cert_with(AlgoType::Sign);
        c.ext_key_usage.push("1.3.6.1.5.5.7.3.1".to_string());
        // keyUsage present but missing digitalSignature -> reject.
        c.key_usage = KeyUsageBits {
            present: true,
            key_encipherment: true,
            ..Default::default()
        };
        assert_eq!(check_consistency(&c), Err(CertErrorKind::Constraint));

        c.key_usage.digital_signature = true;
        assert_eq!(check_consistency(&c), Ok(()));
    }

    #[test]
    fn mutually_exclusive_encipher_decipher_only_rejected() {
        let mut c = cert_with(AlgoType::KeyAgreement);
        c.key_usage = KeyUsageBits {
            present: true,
            encipher_only: true,
            decipher_only: true,
            ..Default::default()
        };
        assert_eq!(check_consistency(&c), Err(CertErrorKind::Constraint));
    }

    #[test]
    fn absent_extensions_impose_no_extra_restriction() {
        let c = cert_with(AlgoType::Sign);
        assert_eq!(check_consistency(&c), Ok(()));
    }

    #[test]
    fn netscape_ssl_ca_requires_cert_sign_and_crl_sign() {
        let mut c = cert_with(AlgoType::Sign);
        c.netscape_cert_type = Some(0x04);
        c.key_usage = KeyUsageBits {
            present: true,
            key_cert_sign: true,
            ..Default::default()
        };
        // missing crlSign
        assert_eq!(check_consistency(&c), Err(CertErrorKind::Constraint));
        c.key_usage.crl_sign = true;
        assert_eq!(check_consistency(&c), Ok(()));
    }
}
