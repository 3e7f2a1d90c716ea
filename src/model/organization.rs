//! Organizations: a named trust domain with its CA, an administrator and an MSP ID.

use std::sync::OnceLock;

use crate::identity::{Identity, IdentityError};

/// Derives the MSP ID for an organization name: every run of non-alphanumeric
/// characters is removed and `MSP` appended.
pub fn msp_id_for(name: &str) -> String {
    let safe: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
    format!("{safe}MSP")
}

/// An organization taking part in the network.
///
/// Immutable once created, except for the CA administrator which is bound exactly once,
/// after the organization's CA process answers enrollment.
#[derive(Debug)]
pub struct Organization {
    name: String,
    msp_id: String,
    ca: Identity,
    admin: Identity,
    ca_admin: OnceLock<Identity>,
}

impl Organization {
    /// Creates an organization, reusing `ca` when supplied (restart) or generating a new CA.
    /// A fresh administrator is always issued.
    pub fn new(name: &str, ca: Option<Identity>) -> Result<Self, IdentityError> {
        let ca = match ca {
            Some(ca) => ca,
            None => Identity::builder(format!("{name} CA")).ca(true).build()?,
        };
        let admin = Identity::builder(format!("{name} Admin"))
            .organizational_unit("admin")
            .signed_by(&ca)
            .build()?;
        Ok(Self {
            name: name.to_string(),
            msp_id: msp_id_for(name),
            ca,
            admin,
            ca_admin: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower-cased name, used for directory names and host labels.
    pub fn label(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    pub fn ca(&self) -> &Identity {
        &self.ca
    }

    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    pub fn ca_admin(&self) -> Option<&Identity> {
        self.ca_admin.get()
    }

    /// Binds the CA administrator. Fails, handing the identity back, if one is already bound.
    pub fn set_ca_admin(&self, identity: Identity) -> Result<(), Identity> {
        self.ca_admin.set(identity)
    }
}
