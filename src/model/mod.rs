//! # Data Model
//!
//! The configuration a network is brought up from, and the organizations it is made of.
//!
//! Both are plain data: [`Config`] is deserialized from the environment and validated
//! before anything touches the disk, and an [`Organization`] is created once at bootstrap
//! and then shared by reference with every component that belongs to it.

mod config;
mod error;
mod organization;

pub use config::{
    home_directory, ChannelConfig, Config, OrganizationConfig, TlsConfig, TlsMaterial, CONFIG_ENV,
    HOME_ENV, PORT_RANGE_END, PORT_RANGE_START,
};
pub use error::ConfigError;
pub use organization::{msp_id_for, Organization};
