pub mod account;
pub mod backends;
pub mod errors;
pub mod executor;
pub mod host;
pub mod registry;
pub mod state;
pub mod test_utils;

pub use account::{EvmAccount, ValueCell};
pub use backends::{BytecodeVm, CallKind, ExecutionResult, Message, Revision, StatusCode};
pub use errors::{InvalidTransaction, VmError};
pub use executor::{TransactionOutcome, execute_transaction};
pub use host::{AccessStatus, BlockHashProvider, EvmHost, Host, TxContext};
pub use registry::{Contract, NativeContract};
pub use state::{StateStore, StorageStatus};
