// ABOUTME: Fatal error taxonomy of the change-capture layer
// ABOUTME: Wiring defects that must abort startup or the offending statement

use thiserror::Error;

use super::hook::HookSpec;
use super::interceptor::WriteKind;

/// Errors that indicate a deployment or wiring defect.
///
/// These always propagate and abort the guarding transaction. Degraded
/// conditions (no actor, unknown node name) are never reported through this
/// type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// A hook was registered with the wrong timing or granularity.
    #[error("{component} for table '{table}' may only be registered as {expected}, got {actual}")]
    InvalidHook {
        component: &'static str,
        table: String,
        expected: HookSpec,
        actual: HookSpec,
    },

    /// The interceptor received a write kind it cannot audit.
    #[error("change capture supports only INSERT, UPDATE and DELETE on '{table}', got {kind}")]
    UnsupportedOperation { table: String, kind: WriteKind },

    /// A row image required by the write kind was not supplied.
    #[error("{kind} on '{table}' (id {record_id}) is missing its {image} row image")]
    MissingRowImage {
        table: String,
        record_id: i64,
        kind: WriteKind,
        image: &'static str,
    },

    /// Something other than the audit writer tried to change the ledger.
    #[error("ledger table '{0}' is append-only and written only by change capture")]
    LedgerWriteRefused(String),

    /// An update tried to move a row to another node.
    #[error(
        "'{column}' of {table} id {record_id} is fixed at creation ('{current}'), refusing to set '{requested}'"
    )]
    NodeNameImmutable {
        table: String,
        record_id: i64,
        column: String,
        current: String,
        requested: String,
    },

    /// The ledger table was listed as a tracked table.
    #[error("ledger table '{0}' cannot itself be tracked by change capture")]
    LedgerTableTracked(String),
}
