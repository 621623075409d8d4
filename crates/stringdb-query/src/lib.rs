//! Query fan-out for StringDB.
//!
//! A query manager runs one logical scan cursor over a database and
//! broadcasts each record to every active subscriber. Subscribers receive
//! `(record id, key, load handle)` messages on their own pipe and may
//! independently request that a record's value be materialized; loads are
//! serialized against the scan cursor by the manager.

pub mod manager;
pub mod message;
pub mod subscriber;

pub use manager::QueryManager;
pub use message::{LoadHandle, Record, RecordId, SubscriberId};
pub use subscriber::{Query, QueryFlow, Subscription};
