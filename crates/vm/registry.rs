use std::collections::HashMap;

use bytes::Bytes;

use crate::errors::VmError;

/// Handler for one deployed native contract function.
pub type NativeFn = fn(&[u8]) -> Result<Vec<u8>, VmError>;

/// A built-in contract dispatching on the leading 4-byte selector of the
/// call input.
#[derive(Clone)]
pub struct NativeContract {
    pub name: &'static str,
    table: HashMap<[u8; 4], NativeFn>,
}

impl std::fmt::Debug for NativeContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeContract")
            .field("name", &self.name)
            .field("selectors", &self.table.len())
            .finish()
    }
}

impl NativeContract {
    pub fn new(name: &'static str) -> Self {
        NativeContract {
            name,
            table: HashMap::new(),
        }
    }

    pub fn register(mut self, selector: [u8; 4], handler: NativeFn) -> Self {
        self.table.insert(selector, handler);
        self
    }

    pub fn dispatch(&self, input: &[u8]) -> Result<Vec<u8>, VmError> {
        let selector: [u8; 4] = input
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or(VmError::UnknownSelector)?;
        let handler = self.table.get(&selector).ok_or(VmError::UnknownSelector)?;
        handler(&input[4..])
    }
}

/// A deployed contract: either plain bytecode interpreted by the external
/// VM, or a native precompile with a fixed dispatch table.
#[derive(Clone, Debug)]
pub enum Contract {
    Bytecode(Bytes),
    Precompile(NativeContract),
}
