//! Subscriber-side query state.

use bytes::Bytes;
use stringdb_common::{Result, StringDbError};
use tokio::sync::{broadcast, mpsc};

use crate::message::{Control, LoadHandle, Record, SubscriberId};

/// Outcome of processing one broadcast record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFlow {
    /// Keep receiving records.
    Continue,
    /// The query is satisfied; stop receiving.
    Completed,
}

/// A user query driven by a subscription.
#[async_trait::async_trait]
pub trait Query: Send {
    /// Processes one broadcast record.
    ///
    /// The record's value is materialized only if `value.load()` is
    /// called; queries that filter on keys alone never touch the device.
    async fn process(&mut self, key: Bytes, value: LoadHandle) -> Result<QueryFlow>;
}

/// One subscriber handle registered with a query manager.
///
/// A subscription owns the pipe the manager broadcasts into. It joins the
/// active set with [`Subscription::go`] and leaves with
/// [`Subscription::stop`]; dropping an active subscription sends `Stop`.
pub struct Subscription {
    id: SubscriberId,
    control: mpsc::UnboundedSender<Control>,
    records: Option<mpsc::UnboundedReceiver<Record>>,
    shutdown: broadcast::Receiver<()>,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        control: mpsc::UnboundedSender<Control>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            control,
            records: None,
            shutdown,
            active: false,
        }
    }

    /// This subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Joins the active set.
    ///
    /// The subscriber is guaranteed every record of any scan that starts
    /// after the manager processes this message; a scan already in
    /// progress is caught on its next restart.
    pub fn go(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }
        let (pipe_tx, pipe_rx) = mpsc::unbounded_channel();
        self.control
            .send(Control::Go {
                id: self.id,
                pipe: pipe_tx,
            })
            .map_err(|_| StringDbError::Closed)?;
        self.records = Some(pipe_rx);
        self.active = true;
        Ok(())
    }

    /// Leaves the active set and closes the pipe. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.records = None;
        self.active = false;
        self.control
            .send(Control::Stop { id: self.id })
            .map_err(|_| StringDbError::Closed)?;
        Ok(())
    }

    /// Receives the next broadcast record.
    ///
    /// Returns `Ok(None)` when the manager has gone away, and
    /// `Err(Cancelled)` when shutdown is signalled.
    pub async fn recv(&mut self) -> Result<Option<Record>> {
        let records = match self.records.as_mut() {
            Some(records) => records,
            None => return Err(StringDbError::Closed),
        };
        tokio::select! {
            _ = self.shutdown.recv() => Err(StringDbError::Cancelled),
            record = records.recv() => Ok(record),
        }
    }

    /// Drives `query` until it completes, the manager goes away, or
    /// shutdown is signalled. Cancellation is a normal termination, not
    /// an error.
    pub async fn run<Q: Query>(&mut self, query: &mut Q) -> Result<()> {
        self.go()?;
        let result = self.drive(query).await;
        let _ = self.stop();
        result
    }

    async fn drive<Q: Query>(&mut self, query: &mut Q) -> Result<()> {
        loop {
            match self.recv().await {
                Err(StringDbError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
                Ok(None) => return Ok(()),
                Ok(Some(record)) => match query.process(record.key, record.value).await? {
                    QueryFlow::Continue => {}
                    QueryFlow::Completed => return Ok(()),
                },
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.active {
            let _ = self.control.send(Control::Stop { id: self.id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> (
        Subscription,
        mpsc::UnboundedReceiver<Control>,
        broadcast::Sender<()>,
    ) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        (
            Subscription::new(7, control_tx, shutdown_rx),
            control_rx,
            shutdown_tx,
        )
    }

    #[tokio::test]
    async fn test_go_registers_pipe() {
        let (mut sub, mut control_rx, _shutdown) = subscription();
        sub.go().unwrap();

        match control_rx.recv().await.unwrap() {
            Control::Go { id, .. } => assert_eq!(id, 7),
            _ => panic!("expected Go"),
        }
    }

    #[tokio::test]
    async fn test_go_is_idempotent() {
        let (mut sub, mut control_rx, _shutdown) = subscription();
        sub.go().unwrap();
        sub.go().unwrap();

        control_rx.recv().await.unwrap();
        assert!(control_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_after_go() {
        let (mut sub, mut control_rx, _shutdown) = subscription();
        sub.go().unwrap();
        sub.stop().unwrap();

        control_rx.recv().await.unwrap();
        match control_rx.recv().await.unwrap() {
            Control::Stop { id } => assert_eq!(id, 7),
            _ => panic!("expected Stop"),
        }
    }

    #[tokio::test]
    async fn test_stop_without_go_is_noop() {
        let (mut sub, mut control_rx, _shutdown) = subscription();
        sub.stop().unwrap();
        assert!(control_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recv_before_go_is_closed() {
        let (mut sub, _control_rx, _shutdown) = subscription();
        assert!(matches!(sub.recv().await, Err(StringDbError::Closed)));
    }

    #[tokio::test]
    async fn test_recv_observes_shutdown() {
        let (mut sub, _control_rx, shutdown) = subscription();
        sub.go().unwrap();

        shutdown.send(()).unwrap();
        assert!(matches!(sub.recv().await, Err(StringDbError::Cancelled)));
    }

    #[tokio::test]
    async fn test_drop_sends_stop() {
        let (mut sub, mut control_rx, _shutdown) = subscription();
        sub.go().unwrap();
        drop(sub);

        control_rx.recv().await.unwrap();
        assert!(matches!(
            control_rx.recv().await.unwrap(),
            Control::Stop { id: 7 }
        ));
    }
}
