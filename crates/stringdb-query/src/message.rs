//! Messages exchanged between the query manager and its subscribers.

use bytes::Bytes;
use stringdb_common::{Result, StringDbError};
use tokio::sync::{mpsc, oneshot};

/// Identifier assigned to a subscriber pipe.
pub type SubscriberId = u64;

/// Position of a record within one scan. Restarts at zero whenever the
/// scanner opens a fresh iterator.
pub type RecordId = u64;

/// Identifier of one scanner pass. Load requests carry it so a reply can
/// be resolved against the scan the record was emitted in.
pub(crate) type ScanEpoch = u64;

/// Control messages subscribers send to the manager.
pub(crate) enum Control {
    /// Add the sender to the active set and begin receiving broadcasts.
    Go {
        id: SubscriberId,
        pipe: mpsc::UnboundedSender<Record>,
    },
    /// Remove the sender from the active set.
    Stop { id: SubscriberId },
    /// Materialize the value for a previously delivered record.
    Load {
        epoch: ScanEpoch,
        record_id: RecordId,
        reply: oneshot::Sender<LoadReply>,
    },
}

/// Reply to a `Load` request, addressed to the requesting subscriber
/// only. Carries the record id so out-of-order replies can be matched to
/// requests.
pub(crate) struct LoadReply {
    pub record_id: RecordId,
    pub value: Result<Bytes>,
}

/// One broadcast record: a key plus a handle that materializes the value
/// on demand.
#[derive(Debug)]
pub struct Record {
    /// Scan position this record was emitted at.
    pub record_id: RecordId,
    /// The record's key.
    pub key: Bytes,
    /// Lazy access to the record's value.
    pub value: LoadHandle,
}

/// Capability to request one record's value from the manager.
///
/// Loads are serialized against the scan cursor; repeated calls return
/// the same bytes.
#[derive(Debug, Clone)]
pub struct LoadHandle {
    epoch: ScanEpoch,
    record_id: RecordId,
    control: mpsc::UnboundedSender<Control>,
}

impl LoadHandle {
    pub(crate) fn new(
        epoch: ScanEpoch,
        record_id: RecordId,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Self {
            epoch,
            record_id,
            control,
        }
    }

    /// Id of the record this handle belongs to.
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// Requests the value from the manager and awaits the reply.
    pub async fn load(&self) -> Result<Bytes> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(Control::Load {
                epoch: self.epoch,
                record_id: self.record_id,
                reply: reply_tx,
            })
            .map_err(|_| StringDbError::Closed)?;

        let reply = reply_rx.await.map_err(|_| StringDbError::Closed)?;
        debug_assert_eq!(reply.record_id, self.record_id);
        reply.value
    }
}
