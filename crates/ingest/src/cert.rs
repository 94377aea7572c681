use crate::error::{Result, StoreError};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

/// What the store needs from a CT certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCert {
    pub fingerprint: String,
    pub sans: Vec<String>,
}

pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Parse `der` and collect its DNS subject alternative names in certificate order.
pub fn parse(der: &[u8]) -> Result<ParsedCert> {
    let (_, x509) = X509Certificate::from_der(der).map_err(|e| StoreError::InvalidCertificate(e.to_string()))?;
    let mut sans = Vec::new();
    let ext = x509.subject_alternative_name().map_err(|e| StoreError::InvalidCertificate(e.to_string()))?;
    if let Some(ext) = ext {
        for name in &ext.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                sans.push(dns.to_string());
            }
        }
    }
    Ok(ParsedCert { fingerprint: fingerprint(der), sans })
}
