pub mod backend;
pub mod dispatcher;
pub mod ledger;
pub mod lnbits;

pub use backend::{BackendError, FailureKind, PaymentBackend, PaymentReceipt};
pub use dispatcher::{DispatchConfig, DispatchOutcome, PaymentDispatcher, SkipReason};
pub use ledger::{
    AttemptId, Claim, Ledger, LedgerError, NewPaymentRecord, PaymentRecord, PaymentStatus, StatusUpdate,
};
pub use lnbits::{LnbitsClient, LnbitsConfig};
