//! Headers, payloads, envelopes and blocks.
//!
//! Every message the control plane sends to the ledger is a signed [`Envelope`] whose
//! payload starts with a [`Header`]; these helpers build and unpack that framing.

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use prost_types::Timestamp;
use sha2::{Digest, Sha256};

use super::{ProtocolError, TransactionId};
use crate::framework::Signer;
use crate::protos::common::{
    Block, BlockData, BlockHeader, BlockMetadata, ChannelHeader, Envelope, Header, HeaderType,
    Payload, SignatureHeader,
};

/// Number of metadata slots in a block.
const BLOCK_METADATA_SLOTS: usize = 5;

pub fn timestamp_now() -> Timestamp {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp {
        seconds: i64::try_from(now.as_secs()).unwrap_or(i64::MAX),
        nanos: i32::try_from(now.subsec_nanos()).unwrap_or_default(),
    }
}

/// Builds a version 1 channel header stamped with the current time.
pub fn channel_header(
    header_type: HeaderType,
    channel: &str,
    tx_id: &TransactionId,
    extension: Vec<u8>,
) -> ChannelHeader {
    ChannelHeader {
        r#type: header_type as i32,
        version: 1,
        timestamp: Some(timestamp_now()),
        channel_id: channel.to_string(),
        tx_id: tx_id.as_str().to_string(),
        epoch: 0,
        extension,
        tls_cert_hash: Vec::new(),
    }
}

pub fn signature_header(tx_id: &TransactionId) -> SignatureHeader {
    SignatureHeader {
        creator: tx_id.creator().to_vec(),
        nonce: tx_id.nonce().to_vec(),
    }
}

/// Builds a full header for a message of `header_type` on `channel`.
pub fn header(
    header_type: HeaderType,
    channel: &str,
    tx_id: &TransactionId,
    extension: Vec<u8>,
) -> Header {
    Header {
        channel_header: channel_header(header_type, channel, tx_id, extension).encode_to_vec(),
        signature_header: signature_header(tx_id).encode_to_vec(),
    }
}

pub fn payload<M: Message>(header: Header, data: &M) -> Payload {
    Payload {
        header: Some(header),
        data: data.encode_to_vec(),
    }
}

/// Serializes and signs a payload.
pub fn envelope<S: Signer + ?Sized>(payload: &Payload, signer: &S) -> Result<Envelope, ProtocolError> {
    let payload = payload.encode_to_vec();
    let signature = signer.identity().sign(&[&payload])?;
    Ok(Envelope { payload, signature })
}

/// Wraps a single envelope into block 0.
pub fn genesis_block(envelope: &Envelope) -> Block {
    let data = envelope.encode_to_vec();
    let data_hash = Sha256::digest(&data).to_vec();
    Block {
        header: Some(BlockHeader {
            number: 0,
            previous_hash: Vec::new(),
            data_hash,
        }),
        data: Some(BlockData { data: vec![data] }),
        metadata: Some(BlockMetadata {
            metadata: vec![Vec::new(); BLOCK_METADATA_SLOTS],
        }),
    }
}

pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M, ProtocolError> {
    Ok(M::decode(bytes)?)
}

/// The header number of a block.
pub fn block_number(block: &Block) -> Result<u64, ProtocolError> {
    block
        .header
        .as_ref()
        .map(|header| header.number)
        .ok_or(ProtocolError::MissingField("block header"))
}

/// Decodes the channel header of a serialized envelope.
pub fn envelope_channel_header(data: &[u8]) -> Result<ChannelHeader, ProtocolError> {
    let envelope: Envelope = decode(data)?;
    let payload: Payload = decode(&envelope.payload)?;
    let header = payload
        .header
        .ok_or(ProtocolError::MissingField("payload header"))?;
    decode(&header.channel_header)
}

/// The transaction IDs of every envelope in a block, in order.
pub fn block_transaction_ids(block: &Block) -> Result<Vec<String>, ProtocolError> {
    let data = block.data.as_ref().map(|data| data.data.as_slice()).unwrap_or_default();
    data.iter()
        .map(|envelope| envelope_channel_header(envelope).map(|header| header.tx_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::SigningIdentity;
    use crate::identity::Identity;
    use crate::protos::common::SignatureHeader;

    fn signer() -> SigningIdentity {
        SigningIdentity::new("Org1MSP", Identity::builder("Org1 Admin").build().unwrap())
    }

    /// Envelope round trips header fields.
    #[test]
    fn test_envelope_round_trips_header_fields() {
        let signer = signer();
        let tx_id = TransactionId::new(&signer);
        let header = header(HeaderType::EndorserTransaction, "channel1", &tx_id, Vec::new());
        let envelope = envelope(&payload(header, &BlockData::default()), &signer).unwrap();

        let channel_header = envelope_channel_header(&envelope.encode_to_vec()).unwrap();
        assert_eq!(channel_header.tx_id, tx_id.as_str());
        assert_eq!(channel_header.channel_id, "channel1");
        assert_eq!(channel_header.version, 1);
        assert_eq!(channel_header.r#type, HeaderType::EndorserTransaction as i32);
        assert!(channel_header.tls_cert_hash.is_empty());

        let payload: Payload = decode(&envelope.payload).unwrap();
        let signature_header: SignatureHeader =
            decode(&payload.header.unwrap().signature_header).unwrap();
        assert_eq!(signature_header.nonce, tx_id.nonce());
        assert_eq!(signature_header.creator, tx_id.creator());
    }

    /// Genesis block hashes its single envelope.
    #[test]
    fn test_genesis_block_hashes_its_single_envelope() {
        let envelope = Envelope {
            payload: b"payload".to_vec(),
            signature: b"signature".to_vec(),
        };
        let block = genesis_block(&envelope);
        let header = block.header.as_ref().unwrap();
        assert_eq!(header.number, 0);
        assert_eq!(header.data_hash, Sha256::digest(envelope.encode_to_vec()).to_vec());
        assert_eq!(block.metadata.as_ref().unwrap().metadata.len(), 5);
        assert_eq!(block.data.as_ref().unwrap().data.len(), 1);
    }
}
