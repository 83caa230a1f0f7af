//! # Contract Layer
//!
//! Typed calls on top of the backend. Argument encoding and result decoding
//! sit behind [`AbiCodec`]; [`StaticAbi`] covers the static head-only types
//! (`uint256`, `address`, `bool`, `bytes32`).

use crate::domain::services::keccak256;
use crate::domain::value_objects::{
    u256_to_word, Address, Bytes, Hash, StorageKey, StorageValue, U256,
};
use crate::errors::BackendError;
use crate::ports::inbound::LedgerBackend;
use crate::service::{LedgerChain, SandboxBackend};
use crate::signer::SigningAccount;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Gas limit for state-changing contract calls.
pub const CONTRACT_CALL_GAS: u64 = 3_000_000;

const WORD: usize = 32;

/// Encoding and decoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    /// No function with that name in the interface.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Argument count or type does not match the signature.
    #[error("argument mismatch for {function}: {reason}")]
    ArgumentMismatch {
        /// Function being encoded.
        function: String,
        /// What did not match.
        reason: String,
    },

    /// Return data shorter than the declared outputs, or a word out of range
    /// for its type.
    #[error("cannot decode output of {function}: {reason}")]
    Decode {
        /// Function being decoded.
        function: String,
        /// What went wrong.
        reason: String,
    },

    /// A type outside the static subset.
    #[error("unsupported abi type: {0}")]
    UnsupportedType(String),

    /// Malformed interface description.
    #[error("invalid abi json: {0}")]
    Json(String),
}

impl From<AbiError> for BackendError {
    fn from(err: AbiError) -> Self {
        Self::Abi(err.to_string())
    }
}

/// Static ABI types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbiType {
    /// `uint256`
    Uint256,
    /// `address`
    Address,
    /// `bool`
    Bool,
    /// `bytes32`
    Bytes32,
}

impl AbiType {
    /// Parses a canonical type name.
    ///
    /// # Errors
    ///
    /// `UnsupportedType` for anything outside the static subset.
    pub fn parse(name: &str) -> Result<Self, AbiError> {
        match name {
            "uint256" | "uint" => Ok(Self::Uint256),
            "address" => Ok(Self::Address),
            "bool" => Ok(Self::Bool),
            "bytes32" => Ok(Self::Bytes32),
            other => Err(AbiError::UnsupportedType(other.to_string())),
        }
    }

    /// Canonical name used in signatures.
    #[must_use]
    pub fn canonical(self) -> &'static str {
        match self {
            Self::Uint256 => "uint256",
            Self::Address => "address",
            Self::Bool => "bool",
            Self::Bytes32 => "bytes32",
        }
    }
}

/// A typed argument or result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiValue {
    /// `uint256`
    Uint(U256),
    /// `address`
    Address(Address),
    /// `bool`
    Bool(bool),
    /// `bytes32`
    Bytes32([u8; 32]),
}

impl AbiValue {
    /// Type of this value.
    #[must_use]
    pub fn abi_type(&self) -> AbiType {
        match self {
            Self::Uint(_) => AbiType::Uint256,
            Self::Address(_) => AbiType::Address,
            Self::Bool(_) => AbiType::Bool,
            Self::Bytes32(_) => AbiType::Bytes32,
        }
    }

    /// The value as a `uint256`, if it is one.
    #[must_use]
    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    fn to_word(&self) -> [u8; 32] {
        match self {
            Self::Uint(v) => u256_to_word(*v),
            Self::Address(a) => u256_to_word(a.to_u256()),
            Self::Bool(b) => u256_to_word(U256::from(u8::from(*b))),
            Self::Bytes32(b) => *b,
        }
    }

    fn from_word(ty: AbiType, word: &[u8]) -> Option<Self> {
        let value = U256::from_big_endian(word);
        match ty {
            AbiType::Uint256 => Some(Self::Uint(value)),
            AbiType::Address => (value.bits() <= 160).then(|| Self::Address(Address::from_u256(value))),
            AbiType::Bool => match value.low_u64() {
                0 if value.is_zero() => Some(Self::Bool(false)),
                1 if value.bits() == 1 => Some(Self::Bool(true)),
                _ => None,
            },
            AbiType::Bytes32 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(word);
                Some(Self::Bytes32(out))
            }
        }
    }
}

/// Pure encode/decode pair for one contract interface.
pub trait AbiCodec: Send + Sync {
    /// Selector plus encoded arguments.
    ///
    /// # Errors
    ///
    /// Unknown function or mismatched arguments.
    fn encode_call(&self, function: &str, args: &[AbiValue]) -> Result<Bytes, AbiError>;

    /// Decodes return data per the function's outputs.
    ///
    /// # Errors
    ///
    /// Unknown function or undecodable data.
    fn decode_result(&self, function: &str, data: &[u8]) -> Result<Vec<AbiValue>, AbiError>;
}

/// One function of a [`StaticAbi`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionAbi {
    /// Function name.
    pub name: String,
    /// Parameter types.
    pub inputs: Vec<AbiType>,
    /// Return types.
    pub outputs: Vec<AbiType>,
}

impl FunctionAbi {
    /// `name(type,...)`.
    #[must_use]
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.inputs.iter().map(|t| t.canonical()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    /// First four bytes of the Keccak-256 of the signature.
    #[must_use]
    pub fn selector(&self) -> [u8; 4] {
        selector(&self.signature())
    }
}

/// Selector of a canonical signature such as `"set(uint256)"`.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let Hash(digest) = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Codec for interfaces built from static types only.
#[derive(Clone, Debug, Default)]
pub struct StaticAbi {
    functions: HashMap<String, FunctionAbi>,
}

#[derive(Deserialize)]
struct JsonEntry {
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<JsonParam>,
    #[serde(default)]
    outputs: Vec<JsonParam>,
}

#[derive(Deserialize)]
struct JsonParam {
    #[serde(rename = "type")]
    ty: String,
}

fn function_kind() -> String {
    "function".to_string()
}

impl StaticAbi {
    /// Empty interface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function.
    #[must_use]
    pub fn with_function(mut self, name: &str, inputs: &[AbiType], outputs: &[AbiType]) -> Self {
        self.functions.insert(
            name.to_string(),
            FunctionAbi {
                name: name.to_string(),
                inputs: inputs.to_vec(),
                outputs: outputs.to_vec(),
            },
        );
        self
    }

    /// Reads the `function` entries of a JSON interface description.
    /// Events, constructors and fallbacks are skipped.
    ///
    /// # Errors
    ///
    /// `Json` on malformed input, `UnsupportedType` for non-static types.
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        let entries: Vec<JsonEntry> =
            serde_json::from_str(json).map_err(|e| AbiError::Json(e.to_string()))?;
        let mut abi = Self::new();
        for entry in entries.into_iter().filter(|e| e.kind == "function") {
            let parse = |params: Vec<JsonParam>| -> Result<Vec<AbiType>, AbiError> {
                params.iter().map(|p| AbiType::parse(&p.ty)).collect()
            };
            let function = FunctionAbi {
                name: entry.name.clone(),
                inputs: parse(entry.inputs)?,
                outputs: parse(entry.outputs)?,
            };
            abi.functions.insert(entry.name, function);
        }
        Ok(abi)
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionAbi> {
        self.functions.get(name)
    }

    fn lookup(&self, name: &str) -> Result<&FunctionAbi, AbiError> {
        self.function(name)
            .ok_or_else(|| AbiError::UnknownFunction(name.to_string()))
    }
}

impl AbiCodec for StaticAbi {
    fn encode_call(&self, function: &str, args: &[AbiValue]) -> Result<Bytes, AbiError> {
        let abi = self.lookup(function)?;
        if args.len() != abi.inputs.len() {
            return Err(AbiError::ArgumentMismatch {
                function: function.to_string(),
                reason: format!("expected {} arguments, got {}", abi.inputs.len(), args.len()),
            });
        }

        let mut out = Vec::with_capacity(4 + WORD * args.len());
        out.extend_from_slice(&abi.selector());
        for (index, (arg, expected)) in args.iter().zip(&abi.inputs).enumerate() {
            if arg.abi_type() != *expected {
                return Err(AbiError::ArgumentMismatch {
                    function: function.to_string(),
                    reason: format!(
                        "argument {index} is {}, expected {}",
                        arg.abi_type().canonical(),
                        expected.canonical()
                    ),
                });
            }
            out.extend_from_slice(&arg.to_word());
        }
        Ok(Bytes::from_vec(out))
    }

    fn decode_result(&self, function: &str, data: &[u8]) -> Result<Vec<AbiValue>, AbiError> {
        let abi = self.lookup(function)?;
        let decode_err = |reason: String| AbiError::Decode {
            function: function.to_string(),
            reason,
        };

        let needed = WORD * abi.outputs.len();
        if data.len() < needed {
            return Err(decode_err(format!(
                "need {needed} bytes, got {}",
                data.len()
            )));
        }
        abi.outputs
            .iter()
            .zip(data.chunks_exact(WORD))
            .enumerate()
            .map(|(index, (ty, word))| {
                AbiValue::from_word(*ty, word).ok_or_else(|| {
                    decode_err(format!("output {index} out of range for {}", ty.canonical()))
                })
            })
            .collect()
    }
}

/// A deployed contract bound to a backend and an interface.
pub struct ContractHandle<C: LedgerChain> {
    address: Address,
    caller: Address,
    codec: Arc<dyn AbiCodec>,
    backend: Arc<SandboxBackend<C>>,
}

impl<C: LedgerChain> ContractHandle<C> {
    /// Handle on `address`. Constant calls are made from the zero address
    /// unless [`ContractHandle::with_caller`] says otherwise.
    #[must_use]
    pub fn new(address: Address, codec: Arc<dyn AbiCodec>, backend: Arc<SandboxBackend<C>>) -> Self {
        Self {
            address,
            caller: Address::ZERO,
            codec,
            backend,
        }
    }

    /// Sender identity for constant calls.
    #[must_use]
    pub fn with_caller(mut self, caller: Address) -> Self {
        self.caller = caller;
        self
    }

    /// Contract address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Simulates `function` at the best block and decodes the result.
    ///
    /// # Errors
    ///
    /// `Abi` on encode/decode failure, `CallFailed` or `EngineFault` from
    /// the simulation.
    pub fn call_const(&self, function: &str, args: &[AbiValue]) -> Result<Vec<AbiValue>, BackendError> {
        let payload = self.codec.encode_call(function, args)?;
        let data = self
            .backend
            .constant_call(&self.caller, &self.address, U256::zero(), payload)?;
        Ok(self.codec.decode_result(function, data.as_slice())?)
    }

    /// Simulates `function` against the state after `block_number`.
    ///
    /// # Errors
    ///
    /// As [`ContractHandle::call_const`], plus `BlockNotFound` and
    /// `StateUnavailable`.
    pub fn call_const_at(
        &self,
        block_number: u64,
        function: &str,
        args: &[AbiValue],
    ) -> Result<Vec<AbiValue>, BackendError> {
        let payload = self.codec.encode_call(function, args)?;
        let data = self.backend.constant_call_at(
            block_number,
            &self.caller,
            &self.address,
            U256::zero(),
            payload,
        )?;
        Ok(self.codec.decode_result(function, data.as_slice())?)
    }

    /// Submits a live call to `function` using the account's current nonce.
    ///
    /// The nonce is read from the best block, so transactions from the same
    /// account still in the pool are not counted.
    ///
    /// # Errors
    ///
    /// `Abi`, `StateUnavailable`, `SigningFailed`, `EngineFault`.
    pub fn call_function(
        &self,
        account: &SigningAccount,
        value: U256,
        function: &str,
        args: &[AbiValue],
    ) -> Result<Hash, BackendError> {
        let payload = self.codec.encode_call(function, args)?;
        let nonce = self.backend.get_nonce(&account.address())?;
        debug!(contract = ?self.address, function, nonce, "contract call submitted");
        self.backend.submit(
            account,
            &self.address,
            value,
            payload,
            nonce,
            CONTRACT_CALL_GAS,
        )
    }

    /// Raw storage slot at the best block.
    ///
    /// # Errors
    ///
    /// `StateUnavailable`.
    pub fn storage(&self, key: &StorageKey) -> Result<StorageValue, BackendError> {
        self.backend.get_storage_at(&self.address, key)
    }
}

impl<C: LedgerChain> fmt::Debug for ContractHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractHandle")
            .field("address", &self.address)
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::chain::{Genesis, InMemoryChain};
    use crate::config::BackendConfig;
    use crate::domain::entities::Account;

    const COUNTER: Address = Address::from_low_u8(0xc0);

    fn counter_abi() -> StaticAbi {
        StaticAbi::new()
            .with_function("get", &[], &[AbiType::Uint256])
            .with_function("set", &[AbiType::Uint256], &[])
    }

    /// get() returns slot 0, set(uint256) writes slot 0.
    fn counter_code(abi: &StaticAbi) -> Vec<u8> {
        let get = abi.function("get").unwrap().selector();
        let set = abi.function("set").unwrap().selector();
        let mut code = vec![0x60, 0x00, 0x35, 0x60, 0xE0, 0x1C];
        code.extend_from_slice(&[0x80, 0x63]);
        code.extend_from_slice(&get);
        code.extend_from_slice(&[0x14, 0x60, 30, 0x57]);
        code.extend_from_slice(&[0x80, 0x63]);
        code.extend_from_slice(&set);
        code.extend_from_slice(&[0x14, 0x60, 42, 0x57]);
        code.extend_from_slice(&[0x60, 0x00, 0x80, 0xFD]);
        // 30: get
        code.extend_from_slice(&[0x5B, 0x60, 0x00, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3]);
        // 42: set
        code.extend_from_slice(&[0x5B, 0x60, 0x04, 0x35, 0x60, 0x00, 0x55, 0x00]);
        code
    }

    fn handle() -> (ContractHandle<InMemoryChain>, SigningAccount) {
        let abi = counter_abi();
        let owner = SigningAccount::random();
        let config = BackendConfig::default();
        let genesis = Genesis::new()
            .with_account(owner.address(), Account::with_balance(U256::from(10u64.pow(18))))
            .with_account(
                COUNTER,
                Account::with_code(Bytes::from_vec(counter_code(&abi)))
                    .with_storage(StorageKey::ZERO, StorageValue::from_u256(U256::from(5))),
            );
        let chain = Arc::new(InMemoryChain::new(&config, genesis));
        let backend = Arc::new(SandboxBackend::new(chain, config));
        (ContractHandle::new(COUNTER, Arc::new(abi), backend), owner)
    }

    #[test]
    fn test_selector_matches_known_value() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        let f = FunctionAbi {
            name: "balanceOf".into(),
            inputs: vec![AbiType::Address],
            outputs: vec![AbiType::Uint256],
        };
        assert_eq!(f.selector(), [0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn test_encode_checks_arity_and_types() {
        let abi = counter_abi();
        let encoded = abi.encode_call("set", &[AbiValue::Uint(U256::from(9))]).unwrap();
        assert_eq!(encoded.len(), 36);
        assert_eq!(encoded.as_slice()[35], 9);

        assert!(matches!(
            abi.encode_call("set", &[]),
            Err(AbiError::ArgumentMismatch { .. })
        ));
        assert!(matches!(
            abi.encode_call("set", &[AbiValue::Bool(true)]),
            Err(AbiError::ArgumentMismatch { .. })
        ));
        assert_eq!(
            abi.encode_call("missing", &[]),
            Err(AbiError::UnknownFunction("missing".into()))
        );
    }

    #[test]
    fn test_decode_rejects_short_or_out_of_range_data() {
        let abi = StaticAbi::new().with_function("flag", &[], &[AbiType::Bool]);
        assert!(matches!(abi.decode_result("flag", &[0u8; 16]), Err(AbiError::Decode { .. })));
        let mut word = [0u8; 32];
        word[31] = 2;
        assert!(matches!(abi.decode_result("flag", &word), Err(AbiError::Decode { .. })));
        word[31] = 1;
        assert_eq!(abi.decode_result("flag", &word).unwrap(), vec![AbiValue::Bool(true)]);
    }

    #[test]
    fn test_from_json_skips_non_functions() {
        let json = r#"[
            {"type": "function", "name": "get", "inputs": [], "outputs": [{"name": "", "type": "uint256"}]},
            {"type": "event", "name": "Changed", "inputs": [{"name": "v", "type": "uint256"}]},
            {"type": "constructor", "inputs": []}
        ]"#;
        let abi = StaticAbi::from_json(json).unwrap();
        assert_eq!(abi.function("get").unwrap().outputs, vec![AbiType::Uint256]);
        assert!(abi.function("Changed").is_none());

        let dynamic = r#"[{"type": "function", "name": "name", "inputs": [], "outputs": [{"type": "string"}]}]"#;
        assert_eq!(
            StaticAbi::from_json(dynamic).unwrap_err(),
            AbiError::UnsupportedType("string".into())
        );
    }

    #[test]
    fn test_call_const_decodes_storage_backed_value() {
        let (contract, _) = handle();
        let out = contract.call_const("get", &[]).unwrap();
        assert_eq!(out, vec![AbiValue::Uint(U256::from(5))]);
    }

    #[test]
    fn test_call_function_then_historical_read() {
        let (contract, owner) = handle();
        contract
            .call_function(&owner, U256::zero(), "set", &[AbiValue::Uint(U256::from(77))])
            .unwrap();
        contract.backend.chain().mine_block().unwrap();

        assert_eq!(contract.storage(&StorageKey::ZERO).unwrap().to_u256(), U256::from(77));
        assert_eq!(
            contract.call_const("get", &[]).unwrap()[0].as_uint(),
            Some(U256::from(77))
        );
        assert_eq!(
            contract.call_const_at(0, "get", &[]).unwrap()[0].as_uint(),
            Some(U256::from(5))
        );
    }

    #[test]
    fn test_unknown_selector_is_call_failed() {
        let (contract, _) = handle();
        let raw = Arc::new(StaticAbi::new().with_function("other", &[], &[]));
        let other = ContractHandle::new(contract.address(), raw, contract.backend.clone());
        assert!(matches!(
            other.call_const("other", &[]),
            Err(BackendError::CallFailed { .. })
        ));
    }
}
