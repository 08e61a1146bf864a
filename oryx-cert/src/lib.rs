//! X.509 certificate reading, chain validation and trust management, used
//! by the TLS layer for peer verification and by S/MIME for signature
//! checking. ASN.1 BER/DER primitive decoding, the RFC 4514 DN string
//! codec, and TLS record framing are external collaborators; this crate
//! owns the certificate data model, the reader's classify-and-fill step,
//! the compliance-leveled validator, and the trust store.

pub mod attr;
pub mod cert;
pub mod dn;
pub mod key_usage;
pub mod reader;
pub mod trust;
pub mod validate;

pub use cert::Certificate;
pub use dn::DistinguishedName;
pub use reader::sniff_and_read_certificate;
pub use trust::TrustStore;
pub use validate::{CertError, ComplianceLevel};
