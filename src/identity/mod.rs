//! # Identity Service
//!
//! X509 identities backed by ECDSA P-256 keys. Everything in the control plane that
//! needs to prove who it is (organization admins, node identities, the TLS identity)
//! is an [`Identity`].
//!
//! ## Architecture Note
//! The rest of the crate treats this module as a black box: it asks for a new
//! identity, imports one from PEM, or asks an identity to sign bytes. Certificate
//! generation uses `rcgen`, signing uses `p256`, and inspection of imported
//! certificates uses `x509-parser`.
//!
//! Signatures are DER-encoded and normalised to low-S form, which the ledger
//! requires to rule out signature malleability.

mod blob;
mod error;

pub use blob::IdentityBlob;
pub(crate) use blob::base64_bytes;
pub use error::IdentityError;

use std::fmt;

use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};

/// A certificate, its private key and (when issued by another identity) the issuing CA.
#[derive(Clone)]
pub struct Identity {
    name: String,
    certificate: String,
    private_key: String,
    ca: Option<String>,
    signing_key: SigningKey,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("has_ca", &self.ca.is_some())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Starts building a new identity with the given display name (also used as the subject CN).
    pub fn builder(name: impl Into<String>) -> IdentityBuilder<'static> {
        IdentityBuilder {
            name: name.into(),
            is_ca: false,
            organizational_unit: None,
            subject_alt_names: Vec::new(),
            issuer: None,
        }
    }

    /// Imports an identity from PEM material.
    pub fn from_pem(
        name: &str,
        certificate: &str,
        private_key: &str,
        ca: Option<&str>,
    ) -> Result<Self, IdentityError> {
        parse_certificate(certificate.as_bytes())?;
        if let Some(ca) = ca {
            parse_certificate(ca.as_bytes())?;
        }
        let signing_key = SigningKey::from_pkcs8_pem(private_key)
            .map_err(|e| IdentityError::PrivateKey(e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            certificate: certificate.to_string(),
            private_key: private_key.to_string(),
            ca: ca.map(str::to_string),
            signing_key,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key
    }

    /// The issuing CA certificate, absent for self-signed identities.
    pub fn ca_pem(&self) -> Option<&str> {
        self.ca.as_deref()
    }

    /// The certificate that anchors trust in this identity: the issuer when there is one,
    /// otherwise the identity's own certificate.
    pub fn trust_anchor_pem(&self) -> &str {
        self.ca.as_deref().unwrap_or(&self.certificate)
    }

    /// The subject common name recorded in the certificate.
    pub fn common_name(&self) -> Result<Option<String>, IdentityError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(self.certificate.as_bytes())
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;
        let certificate = pem
            .parse_x509()
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;
        let common_name = certificate
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        Ok(common_name)
    }

    /// Signs SHA-256 over the concatenation of `parts`, returning a low-S DER signature.
    pub fn sign(&self, parts: &[&[u8]]) -> Result<Vec<u8>, IdentityError> {
        let message = parts.concat();
        let signature: Signature = self
            .signing_key
            .try_sign(&message)
            .map_err(|e| IdentityError::Signing(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// Options for a new identity.
pub struct IdentityBuilder<'a> {
    name: String,
    is_ca: bool,
    organizational_unit: Option<String>,
    subject_alt_names: Vec<String>,
    issuer: Option<&'a Identity>,
}

impl<'a> IdentityBuilder<'a> {
    /// Marks the identity as a certificate authority.
    pub fn ca(mut self, is_ca: bool) -> Self {
        self.is_ca = is_ca;
        self
    }

    pub fn organizational_unit(mut self, ou: impl Into<String>) -> Self {
        self.organizational_unit = Some(ou.into());
        self
    }

    /// DNS names or IP addresses the certificate is valid for.
    pub fn subject_alt_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_alt_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Has `issuer` sign the new certificate instead of self-signing it.
    pub fn signed_by<'b>(self, issuer: &'b Identity) -> IdentityBuilder<'b> {
        IdentityBuilder {
            name: self.name,
            is_ca: self.is_ca,
            organizational_unit: self.organizational_unit,
            subject_alt_names: self.subject_alt_names,
            issuer: Some(issuer),
        }
    }

    pub fn build(self) -> Result<Identity, IdentityError> {
        let key_pair = KeyPair::generate()?;
        let mut params = CertificateParams::new(self.subject_alt_names)?;
        params
            .distinguished_name
            .push(DnType::CommonName, self.name.as_str());
        if let Some(ou) = &self.organizational_unit {
            params
                .distinguished_name
                .push(DnType::OrganizationalUnitName, ou.as_str());
        }
        let mut serial = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut serial);
        serial[0] &= 0x7f;
        params.serial_number = Some(SerialNumber::from_slice(&serial));
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        if self.is_ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages.push(KeyUsagePurpose::KeyCertSign);
            params.key_usages.push(KeyUsagePurpose::CrlSign);
        } else {
            params.is_ca = IsCa::ExplicitNoCa;
        }

        let (certificate, ca) = match self.issuer {
            Some(issuer) => {
                params.use_authority_key_identifier_extension = true;
                let issuer_key = KeyPair::from_pem(issuer.private_key_pem())?;
                let issuer_params = CertificateParams::from_ca_cert_pem(issuer.certificate_pem())?;
                let issuer_certificate = issuer_params.self_signed(&issuer_key)?;
                let certificate = params.signed_by(&key_pair, &issuer_certificate, &issuer_key)?;
                (certificate.pem(), Some(issuer.certificate_pem().to_string()))
            }
            None => (params.self_signed(&key_pair)?.pem(), None),
        };
        let private_key = key_pair.serialize_pem();
        Identity::from_pem(&self.name, &certificate, &private_key, ca.as_deref())
    }
}

fn parse_certificate(pem: &[u8]) -> Result<(), IdentityError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
        .map_err(|e| IdentityError::Certificate(e.to_string()))?;
    pem.parse_x509()
        .map_err(|e| IdentityError::Certificate(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;

    /// Signatures verify and are low-S.
    #[test]
    fn test_signatures_verify_and_are_low_s() {
        let identity = Identity::builder("Org1 Admin").build().unwrap();
        let verifying_key = identity.signing_key.verifying_key();
        for i in 0..16u8 {
            let der = identity.sign(&[b"header", &[i]]).unwrap();
            let signature = Signature::from_der(&der).unwrap();
            assert!(signature.normalize_s().is_none(), "signature should already be low-S");
            let message = [b"header".as_slice(), &[i]].concat();
            verifying_key.verify(&message, &signature).unwrap();
        }
    }

    /// Issued identity records its CA.
    #[test]
    fn test_issued_identity_records_its_ca() {
        let ca = Identity::builder("Org1 CA").ca(true).build().unwrap();
        let admin = Identity::builder("Org1 Admin")
            .organizational_unit("admin")
            .signed_by(&ca)
            .build()
            .unwrap();
        assert_eq!(admin.ca_pem(), Some(ca.certificate_pem()));
        assert_eq!(admin.trust_anchor_pem(), ca.certificate_pem());
        assert_eq!(admin.common_name().unwrap().as_deref(), Some("Org1 Admin"));
        assert!(ca.ca_pem().is_none());
    }

    /// Blob round trip preserves material.
    #[test]
    fn test_blob_round_trip_preserves_material() {
        let ca = Identity::builder("Org1 CA").ca(true).build().unwrap();
        let blob = ca.to_blob();
        let json = serde_json::to_string(&blob).unwrap();
        let restored = Identity::from_blob(&serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.certificate_pem(), ca.certificate_pem());
        assert_eq!(restored.private_key_pem(), ca.private_key_pem());
        assert_eq!(restored.name(), "Org1 CA");
    }

    /// Rejects garbage certificate.
    #[test]
    fn test_rejects_garbage_certificate() {
        let identity = Identity::builder("Org1 Admin").build().unwrap();
        let result = Identity::from_pem("bad", "not a cert", identity.private_key_pem(), None);
        assert!(matches!(result, Err(IdentityError::Certificate(_))));
    }
}
