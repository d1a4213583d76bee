//! Remote operations on the lease table as plain data.
//!
//! Transports decode their wire messages into a [`Request`], hand it to
//! [`execute`] and encode the [`Response`]. Arguments are validated before
//! the lease table is touched.

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    LeaseTable, LesseeId, ReleaseOutcome, Result, SequencerDefinition, SnowcastEpoch,
};

/// A remote operation.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "op", rename_all = "snake_case"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Create the sequencer if needed and lease a logical node id.
    Attach {
        name: String,
        epoch_offset_millis: u64,
        max_logical_node_count: u32,
        backup_count: u32,
        lessee: LesseeId,
    },
    /// Release a logical node id held by `lessee`.
    Detach {
        name: String,
        logical_node_id: u32,
        lessee: LesseeId,
    },
    /// Remove the sequencer and all its leases.
    Destroy { name: String },
}

/// The result of a successful [`Request`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "op", rename_all = "snake_case"))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Attached {
        definition: SequencerDefinition,
        logical_node_id: u32,
    },
    Detached {
        outcome: ReleaseOutcome,
    },
    Destroyed {
        existed: bool,
    },
}

/// Runs `request` against `table`.
///
/// # Errors
///
/// Validation errors for malformed attach arguments, plus whatever the
/// corresponding [`LeaseTable`] operation returns.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(table)))]
pub fn execute(table: &LeaseTable, request: Request) -> Result<Response> {
    match request {
        Request::Attach {
            name,
            epoch_offset_millis,
            max_logical_node_count,
            backup_count,
            lessee,
        } => attach(
            table,
            name,
            epoch_offset_millis,
            max_logical_node_count,
            backup_count,
            lessee,
        ),
        Request::Detach {
            name,
            logical_node_id,
            lessee,
        } => detach(table, &name, logical_node_id, lessee),
        Request::Destroy { name } => destroy(table, &name),
    }
}

fn attach(
    table: &LeaseTable,
    name: String,
    epoch_offset_millis: u64,
    max_logical_node_count: u32,
    backup_count: u32,
    lessee: LesseeId,
) -> Result<Response> {
    let requested = SequencerDefinition::new(
        name,
        SnowcastEpoch::from_unix_millis(epoch_offset_millis),
        max_logical_node_count,
        backup_count,
    )?;
    let (definition, logical_node_id) = table.attach(&requested, lessee)?;
    Ok(Response::Attached {
        definition,
        logical_node_id,
    })
}

fn detach(
    table: &LeaseTable,
    name: &str,
    logical_node_id: u32,
    lessee: LesseeId,
) -> Result<Response> {
    let outcome = table.release(name, logical_node_id, lessee)?;
    Ok(Response::Detached { outcome })
}

fn destroy(table: &LeaseTable, name: &str) -> Result<Response> {
    let existed = table.destroy(name)?;
    Ok(Response::Destroyed { existed })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Error, InMemoryLeaseStore};

    fn table() -> LeaseTable {
        LeaseTable::new(Arc::new(InMemoryLeaseStore::new(2)))
    }

    fn attach_request(name: &str, max: u32, backups: u32, lessee: u64) -> Request {
        Request::Attach {
            name: name.to_owned(),
            epoch_offset_millis: 1_000,
            max_logical_node_count: max,
            backup_count: backups,
            lessee: LesseeId::new(lessee),
        }
    }

    #[test]
    fn attach_detach_destroy() {
        let table = table();

        let Response::Attached {
            definition,
            logical_node_id,
        } = execute(&table, attach_request("seq", 256, 1, 1)).unwrap()
        else {
            panic!("expected attached");
        };
        assert_eq!(logical_node_id, 0);
        assert_eq!(definition.epoch().unix_millis(), 1_000);

        assert_eq!(
            execute(
                &table,
                Request::Detach {
                    name: "seq".into(),
                    logical_node_id,
                    lessee: LesseeId::new(2),
                }
            ),
            Ok(Response::Detached {
                outcome: ReleaseOutcome::Stale
            })
        );
        assert_eq!(
            execute(
                &table,
                Request::Detach {
                    name: "seq".into(),
                    logical_node_id,
                    lessee: LesseeId::new(1),
                }
            ),
            Ok(Response::Detached {
                outcome: ReleaseOutcome::Released
            })
        );

        let destroy = Request::Destroy { name: "seq".into() };
        assert_eq!(
            execute(&table, destroy.clone()),
            Ok(Response::Destroyed { existed: true })
        );
        assert_eq!(
            execute(&table, destroy),
            Ok(Response::Destroyed { existed: false })
        );
    }

    #[test]
    fn invalid_arguments_never_reach_the_table() {
        let table = table();
        assert_eq!(
            execute(&table, attach_request("seq", 127, 1, 1)),
            Err(Error::InvalidMaxLogicalNodeCount(127))
        );
        assert_eq!(
            execute(&table, attach_request("seq", 8193, 1, 1)),
            Err(Error::InvalidMaxLogicalNodeCount(8193))
        );
        assert_eq!(
            execute(&table, attach_request("seq", 128, 32_768, 1)),
            Err(Error::InvalidBackupCount(32_768))
        );
        assert_eq!(
            execute(&table, attach_request("", 128, 1, 1)),
            Err(Error::InvalidName)
        );
        assert!(table.names().unwrap().is_empty());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn requests_are_tagged_by_operation() {
        let json = serde_json::to_value(attach_request("seq", 128, 1, 255)).unwrap();
        assert_eq!(json["op"], "attach");
        assert_eq!(json["lessee"], 255);

        let request: Request =
            serde_json::from_str(r#"{"op":"destroy","name":"seq"}"#).unwrap();
        assert_eq!(request, Request::Destroy { name: "seq".into() });
    }
}
