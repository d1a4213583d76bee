//! Connection-loss notifications feeding the lease table.
//!
//! Whatever detects a lost client (a session reaper, a transport hook) holds
//! a [`DisconnectNotifier`]. A single [`DisconnectListener`] task turns every
//! notification into [`LeaseTable::on_lessee_disconnect`]. The channel is
//! unbounded so detectors never wait on lease store work.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{LeaseTable, LesseeId};

/// Creates a connected notifier and listener.
pub fn disconnect_channel() -> (DisconnectNotifier, DisconnectListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DisconnectNotifier { tx }, DisconnectListener { rx })
}

/// Sending half. Cheap to clone.
#[derive(Clone, Debug)]
pub struct DisconnectNotifier {
    tx: mpsc::UnboundedSender<LesseeId>,
}

impl DisconnectNotifier {
    /// Reports that `lessee` is gone. Returns `false` if the listener has
    /// stopped.
    pub fn notify(&self, lessee: LesseeId) -> bool {
        self.tx.send(lessee).is_ok()
    }
}

/// Receiving half; see [`DisconnectListener::run`].
#[derive(Debug)]
pub struct DisconnectListener {
    rx: mpsc::UnboundedReceiver<LesseeId>,
}

impl DisconnectListener {
    /// Releases the leases of every notified lessee until `cancel` fires or
    /// every notifier is dropped. Returns the number of leases released.
    ///
    /// Store failures are logged and skipped; the lessee's remaining leases
    /// stay held until it is notified again.
    pub async fn run(mut self, table: LeaseTable, cancel: CancellationToken) -> usize {
        #[cfg(feature = "tracing")]
        tracing::debug!("disconnect listener started");

        let mut released = 0;
        loop {
            let lessee = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                lessee = self.rx.recv() => match lessee {
                    Some(lessee) => lessee,
                    None => break,
                },
            };

            match table.on_lessee_disconnect(lessee) {
                Ok(count) => released += count,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(%lessee, "failed to release leases: {_e}");
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(released, "disconnect listener stopped");
        released
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{InMemoryLeaseStore, SequencerDefinition, SnowcastEpoch};

    fn table_with_leases(lessee: LesseeId, count: usize) -> LeaseTable {
        let table = LeaseTable::new(Arc::new(InMemoryLeaseStore::new(1)));
        let def = SequencerDefinition::new("seq", SnowcastEpoch::UNIX, 128, 1).unwrap();
        for _ in 0..count {
            table.attach(&def, lessee).unwrap();
        }
        table
    }

    #[tokio::test]
    async fn releases_until_all_notifiers_drop() {
        let lessee = LesseeId::new(3);
        let table = table_with_leases(lessee, 4);
        let (notifier, listener) = disconnect_channel();
        let task = tokio::spawn(listener.run(table.clone(), CancellationToken::new()));

        assert!(notifier.notify(lessee));
        assert!(notifier.clone().notify(LesseeId::new(77)));
        drop(notifier);

        assert_eq!(task.await.unwrap(), 4);
        assert!(
            table
                .leases("seq")
                .unwrap()
                .iter()
                .all(|lease| lease.state == crate::LeaseState::Detached)
        );
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let lessee = LesseeId::new(3);
        let table = table_with_leases(lessee, 1);
        let (notifier, listener) = disconnect_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(listener.run(table.clone(), cancel).await, 0);
        assert!(!notifier.notify(lessee));
        assert_eq!(table.leases("seq").unwrap()[0].state, crate::LeaseState::Attached);
    }
}
