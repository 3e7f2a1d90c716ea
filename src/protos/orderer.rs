//! `orderer/*.proto`: the atomic broadcast service and ordering configuration values.

use super::common::{Block, Status};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BroadcastResponse {
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub info: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekNewest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekOldest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekSpecified {
    #[prost(uint64, tag = "1")]
    pub number: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekPosition {
    #[prost(oneof = "seek_position::Type", tags = "1, 2, 3")]
    pub r#type: Option<seek_position::Type>,
}

pub mod seek_position {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Newest(super::SeekNewest),
        #[prost(message, tag = "2")]
        Oldest(super::SeekOldest),
        #[prost(message, tag = "3")]
        Specified(super::SeekSpecified),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeekInfo {
    #[prost(message, optional, tag = "1")]
    pub start: Option<SeekPosition>,
    #[prost(message, optional, tag = "2")]
    pub stop: Option<SeekPosition>,
    #[prost(enumeration = "seek_info::SeekBehavior", tag = "3")]
    pub behavior: i32,
}

pub mod seek_info {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum SeekBehavior {
        BlockUntilReady = 0,
        FailIfNotReady = 1,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeliverResponse {
    #[prost(oneof = "deliver_response::Type", tags = "1, 2")]
    pub r#type: Option<deliver_response::Type>,
}

pub mod deliver_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(enumeration = "super::Status", tag = "1")]
        Status(i32),
        #[prost(message, tag = "2")]
        Block(super::Block),
    }
}

// =============================================================================
// ORDERING CONFIGURATION VALUES
// =============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchSize {
    #[prost(uint32, tag = "1")]
    pub max_message_count: u32,
    #[prost(uint32, tag = "2")]
    pub absolute_max_bytes: u32,
    #[prost(uint32, tag = "3")]
    pub preferred_max_bytes: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchTimeout {
    #[prost(string, tag = "1")]
    pub timeout: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsensusType {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(bytes = "vec", tag = "2")]
    pub metadata: Vec<u8>,
    #[prost(int32, tag = "3")]
    pub state: i32,
}

/// `orderer/etcdraft/configuration.proto`
pub mod etcdraft {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ConfigMetadata {
        #[prost(message, repeated, tag = "1")]
        pub consenters: Vec<Consenter>,
        #[prost(message, optional, tag = "2")]
        pub options: Option<Options>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Consenter {
        #[prost(string, tag = "1")]
        pub host: String,
        #[prost(uint32, tag = "2")]
        pub port: u32,
        #[prost(bytes = "vec", tag = "3")]
        pub client_tls_cert: Vec<u8>,
        #[prost(bytes = "vec", tag = "4")]
        pub server_tls_cert: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Options {
        #[prost(string, tag = "1")]
        pub tick_interval: String,
        #[prost(uint32, tag = "2")]
        pub election_tick: u32,
        #[prost(uint32, tag = "3")]
        pub heartbeat_tick: u32,
        #[prost(uint32, tag = "4")]
        pub max_inflight_blocks: u32,
        #[prost(uint32, tag = "5")]
        pub snapshot_interval_size: u32,
    }
}
