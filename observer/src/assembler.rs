//! Stamp resolved operations with the ledger metadata of their transaction.

use crate::{
    resolver::{DeltaReference, ResolvedBatch},
    AnchoredOperation, Error, OperationType, Protocol, SidetreeTxn,
};
use tracing::warn;

/// Convert a resolved batch into [AnchoredOperation]s for `txn`.
///
/// Operations are emitted in file order: creates, recovers and deactivates from the core index
/// file, then updates from the provisional index file. Unsupported operation groups are skipped.
pub fn assemble(
    txn: &SidetreeTxn,
    batch: ResolvedBatch,
    protocol: &Protocol,
) -> Result<Vec<AnchoredOperation>, Error> {
    for (group, count) in &batch.unsupported {
        warn!(
            namespace = %txn.namespace,
            transaction_number = txn.transaction_number,
            group = %group,
            count,
            "skipping unsupported operations"
        );
    }

    let mut operations = Vec::with_capacity(batch.len());
    let stamp = |operation_type, unique_suffix, index: usize| AnchoredOperation {
        operation_type,
        unique_suffix,
        suffix_data: None,
        delta: None,
        reveal_value: None,
        transaction_number: txn.transaction_number,
        transaction_time: txn.transaction_time,
        namespace: txn.namespace.clone(),
        operation_index: index as u32,
    };

    for create in batch.creates {
        let unique_suffix = create
            .suffix_data
            .unique_suffix(protocol.hash_algorithm_in_multihash_code)?;
        operations.push(AnchoredOperation {
            suffix_data: Some(create.suffix_data),
            delta: create.delta,
            ..stamp(OperationType::Create, unique_suffix, operations.len())
        });
    }
    for DeltaReference { reference, delta } in batch.recovers {
        operations.push(AnchoredOperation {
            delta: Some(delta),
            reveal_value: reference.reveal_value,
            ..stamp(OperationType::Recover, reference.did_suffix, operations.len())
        });
    }
    for reference in batch.deactivates {
        operations.push(AnchoredOperation {
            reveal_value: reference.reveal_value,
            ..stamp(OperationType::Deactivate, reference.did_suffix, operations.len())
        });
    }
    for DeltaReference { reference, delta } in batch.updates {
        operations.push(AnchoredOperation {
            delta: Some(delta),
            reveal_value: reference.reveal_value,
            ..stamp(OperationType::Update, reference.did_suffix, operations.len())
        });
    }
    Ok(operations)
}
