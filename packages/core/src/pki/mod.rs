//! etcd client identity
//!
//! Generates the cluster CA and the etcd client certificate, writes them
//! under the node certificate names, and loads them back into a
//! [`ClientIdentity`] whose TLS connector is built once and shared.

use std::fmt;
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509Builder, X509Name, X509NameBuilder};
use thiserror::Error;
use tracing::debug;

use crate::etcd::helpers::{CA_CERT_NAME, ETCD_CERT_NAME};
use crate::host::Host;

const KEY_BITS: u32 = 2048;
const CA_VALIDITY_DAYS: u32 = 3650;
const CERT_VALIDITY_DAYS: u32 = 3650;

/// Errors from certificate generation and loading
#[derive(Error, Debug)]
pub enum PkiError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate and private key do not match")]
    KeyMismatch,
}

/// Certificate authority that signs the etcd client certificate
pub struct CertificateAuthority {
    pub cert: X509,
    pub key: PKey<Private>,
}

fn generate_key() -> Result<PKey<Private>, PkiError> {
    let rsa = Rsa::generate(KEY_BITS)?;
    Ok(PKey::from_rsa(rsa)?)
}

fn random_serial() -> Result<Asn1Integer, PkiError> {
    let mut serial = BigNum::new()?;
    serial.rand(127, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}

fn common_name(cn: &str) -> Result<X509Name, PkiError> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, cn)?;
    Ok(name.build())
}

fn base_builder(
    subject: &X509Name,
    key: &PKey<Private>,
    days: u32,
) -> Result<X509Builder, PkiError> {
    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = random_serial()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(subject)?;
    builder.set_pubkey(key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(days)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    Ok(builder)
}

/// Self-signed CA
pub fn generate_ca(cn: &str) -> Result<CertificateAuthority, PkiError> {
    let key = generate_key()?;
    let name = common_name(cn)?;

    let mut builder = base_builder(&name, &key, CA_VALIDITY_DAYS)?;
    builder.set_issuer_name(&name)?;
    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()?,
    )?;
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;
    builder.sign(&key, MessageDigest::sha256())?;

    debug!("Generated CA [{}]", cn);
    Ok(CertificateAuthority {
        cert: builder.build(),
        key,
    })
}

/// SAN entries for the etcd certificate: every host address plus loopback
fn san_entries(hosts: &[Host]) -> Vec<String> {
    let mut entries = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    for host in hosts {
        for value in [&host.address, &host.internal_address, &host.hostname] {
            if !entries.contains(value) {
                entries.push(value.clone());
            }
        }
    }
    entries
}

/// etcd certificate signed by `ca`, valid for client and server auth
pub fn generate_etcd_client(
    ca: &CertificateAuthority,
    hosts: &[Host],
) -> Result<ClientIdentity, PkiError> {
    let key = generate_key()?;
    let name = common_name(ETCD_CERT_NAME)?;

    let mut builder = base_builder(&name, &key, CERT_VALIDITY_DAYS)?;
    builder.set_issuer_name(ca.cert.subject_name())?;
    builder.append_extension(BasicConstraints::new().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    builder.append_extension(
        ExtendedKeyUsage::new()
            .client_auth()
            .server_auth()
            .build()?,
    )?;

    let mut san = SubjectAlternativeName::new();
    for entry in san_entries(hosts) {
        if entry.parse::<IpAddr>().is_ok() {
            san.ip(&entry);
        } else {
            san.dns(&entry);
        }
    }
    let san = san.build(&builder.x509v3_context(Some(&ca.cert), None))?;
    builder.append_extension(san)?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(false)
        .build(&builder.x509v3_context(Some(&ca.cert), None))?;
    builder.append_extension(aki)?;
    builder.sign(&ca.key, MessageDigest::sha256())?;

    ClientIdentity::new(builder.build(), key, Some(ca.cert.clone()))
}

/// Certificate and key presented to etcd's client port
///
/// Server verification is disabled: the dialer transport is the trust
/// boundary, and etcd is addressed by internal IP.
#[derive(Clone)]
pub struct ClientIdentity {
    cert: X509,
    key: PKey<Private>,
    ca: Option<X509>,
    connector: SslConnector,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("has_ca", &self.ca.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientIdentity {
    pub fn new(cert: X509, key: PKey<Private>, ca: Option<X509>) -> Result<Self, PkiError> {
        if !cert.public_key()?.public_eq(&key) {
            return Err(PkiError::KeyMismatch);
        }

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_verify(SslVerifyMode::NONE);
        builder.set_certificate(&cert)?;
        builder.set_private_key(&key)?;
        builder.check_private_key()?;

        Ok(Self {
            cert,
            key,
            ca,
            connector: builder.build(),
        })
    }

    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, PkiError> {
        let cert = X509::from_pem(cert_pem)?;
        let key = PKey::private_key_from_pem(key_pem)?;
        Self::new(cert, key, None)
    }

    /// Load certificate and key from PEM files
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, PkiError> {
        Self::from_pem(&read_file(cert_path)?, &read_file(key_path)?)
    }

    /// Attach the CA certificate stored at `path`
    pub fn with_ca_file(mut self, path: &Path) -> Result<Self, PkiError> {
        self.ca = Some(X509::from_pem(&read_file(path)?)?);
        Ok(self)
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    /// CA that signed this identity, when it was generated here
    pub fn ca_certificate(&self) -> Option<&X509> {
        self.ca.as_ref()
    }

    /// TLS connector presenting this identity
    pub fn connector(&self) -> &SslConnector {
        &self.connector
    }

    pub fn cert_pem(&self) -> Result<Vec<u8>, PkiError> {
        Ok(self.cert.to_pem()?)
    }

    pub fn key_pem(&self) -> Result<Vec<u8>, PkiError> {
        Ok(self.key.private_key_to_pem_pkcs8()?)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, PkiError> {
    fs::read(path).map_err(|source| PkiError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<(), PkiError> {
    let write_err = |source| PkiError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(write_err)?;
    file.write_all(contents).map_err(write_err)
}

/// Paths written by [`write_bundle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePaths {
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl BundlePaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            ca_cert: dir.join(format!("{CA_CERT_NAME}.pem")),
            ca_key: dir.join(format!("{CA_CERT_NAME}-key.pem")),
            cert: dir.join(format!("{ETCD_CERT_NAME}.pem")),
            key: dir.join(format!("{ETCD_CERT_NAME}-key.pem")),
        }
    }
}

/// Write CA and etcd certificate under the node names; keys get mode 0600
pub fn write_bundle(
    dir: &Path,
    ca: &CertificateAuthority,
    identity: &ClientIdentity,
) -> Result<BundlePaths, PkiError> {
    fs::create_dir_all(dir).map_err(|source| PkiError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let paths = BundlePaths::in_dir(dir);
    write_file(&paths.ca_cert, &ca.cert.to_pem()?, 0o644)?;
    write_file(&paths.ca_key, &ca.key.private_key_to_pem_pkcs8()?, 0o600)?;
    write_file(&paths.cert, &identity.cert_pem()?, 0o644)?;
    write_file(&paths.key, &identity.key_pem()?, 0o600)?;

    debug!("Wrote certificate bundle to {}", dir.display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn etcd_hosts() -> Vec<Host> {
        vec![
            Host::new("203.0.113.1", "A").with_internal_address("10.0.0.1"),
            Host::new("203.0.113.2", "B").with_internal_address("10.0.0.2"),
        ]
    }

    #[test]
    fn client_certificate_is_signed_by_ca() {
        let ca = generate_ca("kube-ca").unwrap();
        let identity = generate_etcd_client(&ca, &etcd_hosts()).unwrap();

        assert!(identity.certificate().verify(&ca.key).unwrap());
        assert!(ca.cert.verify(&ca.key).unwrap());
    }

    #[test]
    fn certificates_get_fresh_serials_and_a_current_validity_window() {
        let ca = generate_ca("kube-ca").unwrap();
        let identity = generate_etcd_client(&ca, &etcd_hosts()).unwrap();
        let cert = identity.certificate();

        let serial = cert.serial_number().to_bn().unwrap();
        let ca_serial = ca.cert.serial_number().to_bn().unwrap();
        assert_ne!(serial, ca_serial);

        let now = Asn1Time::days_from_now(0).unwrap();
        assert!(cert.not_before() <= now);
        assert!(cert.not_after() > now);
        assert_eq!(
            cert.not_before().diff(cert.not_after()).unwrap().days,
            CERT_VALIDITY_DAYS as i32
        );
    }

    #[test]
    fn san_covers_every_address_once() {
        let entries = san_entries(&etcd_hosts());
        assert_eq!(
            entries,
            vec![
                "localhost",
                "127.0.0.1",
                "203.0.113.1",
                "10.0.0.1",
                "A",
                "203.0.113.2",
                "10.0.0.2",
                "B"
            ]
        );

        let ca = generate_ca("kube-ca").unwrap();
        let identity = generate_etcd_client(&ca, &etcd_hosts()).unwrap();
        let sans = identity.certificate().subject_alt_names().unwrap();
        assert!(sans.iter().any(|n| n.dnsname() == Some("localhost")));
        assert!(sans
            .iter()
            .any(|n| n.ipaddress() == Some(&[10u8, 0, 0, 2][..])));
    }

    #[test]
    fn bundle_is_written_with_private_keys_locked_down() {
        let dir = tempfile::tempdir().unwrap();
        let ca = generate_ca("kube-ca").unwrap();
        let identity = generate_etcd_client(&ca, &etcd_hosts()).unwrap();

        let paths = write_bundle(dir.path(), &ca, &identity).unwrap();
        assert!(paths.cert.ends_with("kube-etcd.pem"));
        assert!(paths.key.ends_with("kube-etcd-key.pem"));
        assert!(paths.ca_cert.ends_with("kube-ca.pem"));

        let mode = fs::metadata(&paths.key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let loaded = ClientIdentity::load(&paths.cert, &paths.key)
            .unwrap()
            .with_ca_file(&paths.ca_cert)
            .unwrap();
        assert_eq!(
            loaded.certificate().to_der().unwrap(),
            identity.certificate().to_der().unwrap()
        );
        assert_eq!(
            loaded.ca_certificate().unwrap().to_der().unwrap(),
            ca.cert.to_der().unwrap()
        );
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let ca = generate_ca("kube-ca").unwrap();
        let identity = generate_etcd_client(&ca, &etcd_hosts()).unwrap();
        let other_key = ca.key.private_key_to_pem_pkcs8().unwrap();

        let err = ClientIdentity::from_pem(&identity.cert_pem().unwrap(), &other_key).unwrap_err();
        assert!(matches!(err, PkiError::KeyMismatch));
    }

    #[test]
    fn missing_files_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("kube-etcd.pem");
        let err = ClientIdentity::load(&cert, &dir.path().join("kube-etcd-key.pem")).unwrap_err();
        match err {
            PkiError::Read { path, .. } => assert_eq!(path, cert),
            other => panic!("Expected Read error, got: {other:?}"),
        }
    }
}
