//! Transport form of an identity, as persisted in the state file and published by the console.

use serde::{Deserialize, Serialize};

use super::{Identity, IdentityError};

/// An identity with its binary fields base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityBlob {
    pub display_name: String,
    #[serde(with = "base64_bytes")]
    pub certificate: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub private_key: Vec<u8>,
    #[serde(default, with = "base64_option")]
    pub ca: Option<Vec<u8>>,
}

impl Identity {
    /// Converts the identity into its transport form.
    pub fn to_blob(&self) -> IdentityBlob {
        IdentityBlob {
            display_name: self.name().to_string(),
            certificate: self.certificate_pem().as_bytes().to_vec(),
            private_key: self.private_key_pem().as_bytes().to_vec(),
            ca: self.ca_pem().map(|ca| ca.as_bytes().to_vec()),
        }
    }

    /// Rehydrates an identity from its transport form.
    pub fn from_blob(blob: &IdentityBlob) -> Result<Self, IdentityError> {
        let certificate = String::from_utf8(blob.certificate.clone())?;
        let private_key = String::from_utf8(blob.private_key.clone())?;
        let ca = blob.ca.clone().map(String::from_utf8).transpose()?;
        Identity::from_pem(&blob.display_name, &certificate, &private_key, ca.as_deref())
    }
}

pub(crate) mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::decode(encoded).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod base64_option {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&base64::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| base64::decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
