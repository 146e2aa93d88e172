//! A throwaway certificate authority for the local control plane and the
//! webhook server.
//!
//! The CA signs three kinds of leaf certificates: the API server's serving
//! certificate, the webhook server's serving certificate, and the admin
//! client certificate the suite authenticates with.

use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, string::Ia5String,
};

use crate::error::{Error, Result};

/// A PEM-encoded certificate with its private key
#[derive(Clone, Debug)]
pub struct CertPair {
    pub cert_pem: String,
    pub key_pem: String,
}

impl CertPair {
    /// Write the pair as `<dir>/<cert_name>` and `<dir>/<key_name>`
    pub fn write(&self, dir: &Path, cert_name: &str, key_name: &str) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let cert_path = dir.join(cert_name);
        std::fs::write(&cert_path, &self.cert_pem).map_err(|e| Error::io(&cert_path, e))?;
        let key_path = dir.join(key_name);
        std::fs::write(&key_path, &self.key_pem).map_err(|e| Error::io(&key_path, e))?;
        Ok(())
    }
}

/// Self-signed CA
pub struct TinyCa {
    cert_pem: String,
    key_pem: String,
    issuer: Issuer<'static, KeyPair>,
}

fn distinguished_name(common_name: &str, organizations: &[&str]) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    for org in organizations {
        dn.push(DnType::OrganizationName, DnValue::Utf8String(org.to_string()));
    }
    dn
}

fn subject_alt_names(sans: &[&str]) -> Result<Vec<SanType>> {
    sans.iter()
        .map(|san| {
            if let Ok(ip) = san.parse::<std::net::IpAddr>() {
                Ok(SanType::IpAddress(ip))
            } else {
                Ia5String::try_from(san.to_string())
                    .map(SanType::DnsName)
                    .map_err(|e| Error::Certificate(format!("invalid DNS name '{san}': {e}")))
            }
        })
        .collect()
}

impl TinyCa {
    pub fn new() -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name("capo-e2e-ca", &[]);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let key = KeyPair::generate()
            .map_err(|e| Error::Certificate(format!("failed to generate CA key: {e}")))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| Error::Certificate(format!("failed to create CA cert: {e}")))?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            issuer: Issuer::new(params, key),
        })
    }

    pub fn ca_cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn ca_key_pem(&self) -> &str {
        &self.key_pem
    }

    /// TLS serving certificate valid for `sans` (IP addresses or DNS names)
    pub fn serving_cert(&self, sans: &[&str]) -> Result<CertPair> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(sans.first().copied().unwrap_or("localhost"), &[]);
        params.subject_alt_names = subject_alt_names(sans)?;
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        self.issue(params)
    }

    /// Client certificate; Kubernetes maps `organizations` to groups
    pub fn client_cert(&self, common_name: &str, organizations: &[&str]) -> Result<CertPair> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name, organizations);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        self.issue(params)
    }

    fn issue(&self, mut params: CertificateParams) -> Result<CertPair> {
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];

        let key = KeyPair::generate()
            .map_err(|e| Error::Certificate(format!("failed to generate key: {e}")))?;
        let cert = params
            .signed_by(&key, &self.issuer)
            .map_err(|e| Error::Certificate(format!("failed to sign certificate: {e}")))?;

        Ok(CertPair {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }
}

/// A fresh key usable as both service account signing and verification key
pub fn service_account_key() -> Result<String> {
    KeyPair::generate()
        .map(|key| key.serialize_pem())
        .map_err(|e| Error::Certificate(format!("failed to generate service account key: {e}")))
}
