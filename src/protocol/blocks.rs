//! # Block Retrieval & Commit Confirmation
//!
//! A seek asks a [`Deliverer`] for exactly one block (the newest, a specific number, or
//! the current configuration block) and fails unless exactly one block comes back.
//!
//! ## Seek behaviour
//! Whether the ledger should wait for a block that does not exist yet is an explicit
//! [`SeekBehavior`] on every call:
//!
//! * [`SeekBehavior::FailIfNotReady`] for newest/config lookups and queries;
//! * [`SeekBehavior::BlockUntilReady`] when fetching a freshly created channel's genesis
//!   block and while polling forward for a commit.
//!
//! Nothing in this module retries silently, except [`poll_genesis_block`] which treats
//! "not there yet" as transient within its own bound.

use std::time::Duration;

use tracing::{debug, instrument};

use super::builder::{block_number, block_transaction_ids, decode, envelope, header, payload};
use super::{ProtocolError, TransactionId};
use crate::framework::Deliverer;
use crate::protos::common::{
    Block, BlockMetadataIndex, Envelope, HeaderType, LastConfig, Metadata, OrdererBlockMetadata,
};
use crate::protos::orderer::seek_info::SeekBehavior as WireSeekBehavior;
use crate::protos::orderer::seek_position::Type as SeekType;
use crate::protos::orderer::{SeekInfo, SeekNewest, SeekPosition, SeekSpecified};

/// Interval between attempts while waiting for a new channel's genesis block.
pub const GENESIS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the ledger should do when the requested block does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekBehavior {
    /// Hold the stream open until the block is available.
    BlockUntilReady,
    /// Answer immediately with a non-success status.
    FailIfNotReady,
}

impl From<SeekBehavior> for WireSeekBehavior {
    fn from(behavior: SeekBehavior) -> Self {
        match behavior {
            SeekBehavior::BlockUntilReady => WireSeekBehavior::BlockUntilReady,
            SeekBehavior::FailIfNotReady => WireSeekBehavior::FailIfNotReady,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekTarget {
    Newest,
    Specified(u64),
}

impl SeekTarget {
    fn position(self) -> SeekPosition {
        let r#type = match self {
            SeekTarget::Newest => SeekType::Newest(SeekNewest {}),
            SeekTarget::Specified(number) => SeekType::Specified(SeekSpecified { number }),
        };
        SeekPosition { r#type: Some(r#type) }
    }
}

fn seek_envelope<D: Deliverer + ?Sized>(
    deliverer: &D,
    channel: &str,
    target: SeekTarget,
    behavior: SeekBehavior,
) -> Result<Envelope, ProtocolError> {
    let seek_info = SeekInfo {
        start: Some(target.position()),
        stop: Some(target.position()),
        behavior: WireSeekBehavior::from(behavior) as i32,
    };
    let tx_id = TransactionId::new(deliverer);
    let header = header(HeaderType::DeliverSeekInfo, channel, &tx_id, Vec::new());
    envelope(&payload(header, &seek_info), deliverer)
}

async fn seek<D: Deliverer + ?Sized>(
    deliverer: &D,
    channel: &str,
    target: SeekTarget,
    behavior: SeekBehavior,
) -> Result<Block, ProtocolError> {
    let envelope = seek_envelope(deliverer, channel, target, behavior)?;
    let mut result: Option<Block> = None;
    deliverer
        .deliver(envelope, &mut |block: Block| -> Result<(), ProtocolError> {
            if result.is_some() {
                return Err(ProtocolError::MultipleBlocks);
            }
            result = Some(block);
            Ok(())
        })
        .await?;
    result.ok_or(ProtocolError::NoBlocks)
}

/// Fetches the newest block on a channel.
#[instrument(skip(deliverer))]
pub async fn newest_block<D: Deliverer + ?Sized>(
    deliverer: &D,
    channel: &str,
    behavior: SeekBehavior,
) -> Result<Block, ProtocolError> {
    seek(deliverer, channel, SeekTarget::Newest, behavior).await
}

/// Fetches block `number`, checking the ledger returned that exact block.
#[instrument(skip(deliverer))]
pub async fn specific_block<D: Deliverer + ?Sized>(
    deliverer: &D,
    channel: &str,
    number: u64,
    behavior: SeekBehavior,
) -> Result<Block, ProtocolError> {
    let block = seek(deliverer, channel, SeekTarget::Specified(number), behavior).await?;
    let actual = block_number(&block)?;
    if actual != number {
        return Err(ProtocolError::UnexpectedBlock {
            expected: number,
            actual,
        });
    }
    Ok(block)
}

pub async fn genesis_block<D: Deliverer + ?Sized>(
    deliverer: &D,
    channel: &str,
    behavior: SeekBehavior,
) -> Result<Block, ProtocolError> {
    specific_block(deliverer, channel, 0, behavior).await
}

/// Reads the index of the last configuration block from a block's metadata.
///
/// The orderer metadata in the signatures slot wins when it carries the index. Otherwise
/// the last-config slot is decoded; an empty slot there encodes index 0.
pub fn last_config_index(block: &Block) -> Result<u64, ProtocolError> {
    let slots = block
        .metadata
        .as_ref()
        .map(|metadata| metadata.metadata.as_slice())
        .unwrap_or_default();

    if let Some(bytes) = slots
        .get(BlockMetadataIndex::Signatures as usize)
        .filter(|bytes| !bytes.is_empty())
    {
        let metadata: Metadata = decode(bytes)?;
        let orderer: OrdererBlockMetadata = decode(&metadata.value)?;
        if let Some(last_config) = orderer.last_config {
            return Ok(last_config.index);
        }
    }
    if let Some(bytes) = slots.get(BlockMetadataIndex::LastConfig as usize) {
        let metadata: Metadata = decode(bytes)?;
        let last_config: LastConfig = decode(&metadata.value)?;
        return Ok(last_config.index);
    }
    Err(ProtocolError::MissingField("last config metadata"))
}

/// Fetches the current configuration block: newest block, then its last-config index,
/// then that block.
#[instrument(skip(deliverer))]
pub async fn config_block<D: Deliverer + ?Sized>(
    deliverer: &D,
    channel: &str,
    behavior: SeekBehavior,
) -> Result<Block, ProtocolError> {
    let newest = newest_block(deliverer, channel, behavior).await?;
    let index = last_config_index(&newest)?;
    debug!(index, "Resolved last config block");
    if block_number(&newest)? == index {
        return Ok(newest);
    }
    specific_block(deliverer, channel, index, behavior).await
}

/// Polls for a newly created channel's genesis block every `interval` until it arrives.
///
/// Retryable failures (the ordering node has not created the channel yet) are swallowed
/// until `timeout` elapses; anything else is returned immediately.
#[instrument(skip(deliverer))]
pub async fn poll_genesis_block<D: Deliverer + ?Sized>(
    deliverer: &D,
    channel: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<Block, ProtocolError> {
    let poll = async {
        loop {
            match genesis_block(deliverer, channel, SeekBehavior::BlockUntilReady).await {
                Ok(block) => return Ok(block),
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "Genesis block not available yet");
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    };
    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| ProtocolError::Timeout(timeout, "channel genesis block"))?
}

/// Scans forward from block `start` until a block containing `tx_id` is found, returning
/// that block's number.
///
/// Blocks are requested strictly in increasing order. There is no timeout here; the
/// caller bounds the overall wait.
#[instrument(skip(deliverer))]
pub async fn wait_for_transaction<D: Deliverer + ?Sized>(
    deliverer: &D,
    channel: &str,
    start: u64,
    tx_id: &str,
) -> Result<u64, ProtocolError> {
    let mut number = start;
    loop {
        let block = specific_block(deliverer, channel, number, SeekBehavior::BlockUntilReady).await?;
        if block_transaction_ids(&block)?.iter().any(|id| id == tx_id) {
            debug!(block = number, "Transaction committed");
            return Ok(number);
        }
        number += 1;
    }
}
