//! Exception taxonomy for EVM call frames and the classifier that maps
//! interpreter failure messages onto it.
//!
//! The interpreter reports failures as text, not codes, so the literal
//! strings below must match what it emits byte for byte.

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const MSG_EXECUTION_REVERTED: &str = "evm: execution reverted";
pub const MSG_DEPOSIT_OUT_OF_GAS: &str = "contract creation code storage out of gas";
pub const MSG_OUT_OF_GAS: &str = "out of gas";
pub const MSG_MAX_CALL_DEPTH: &str = "max call depth exceeded";
pub const MSG_INSUFFICIENT_BALANCE: &str = "insufficient balance for transfer";
pub const MSG_WRITE_PROTECTION: &str = "evm: write protection";
pub const MSG_RETURN_DATA_OUT_OF_BOUNDS: &str = "evm: return data out of bounds";
pub const MSG_CONTRACT_ADDRESS_COLLISION: &str = "contract address collision";
pub const MSG_MAX_CODE_SIZE_EXCEEDED: &str = "evm: max code size exceeded";
pub const MSG_GAS_UINT_OVERFLOW: &str = "gas uint64 overflow";
pub const MSG_EMPTY_CODE: &str = "empty call code";

pub const PREFIX_STACK_UNDERFLOW: &str = "stack underflow";
pub const PREFIX_STACK_LIMIT: &str = "stack limit reached";
pub const PREFIX_INVALID_JUMP: &str = "invalid jump destination";
pub const PREFIX_INVALID_OPCODE: &str = "invalid opcode";

/// Outcome kind of one call frame. The integer codes are persisted and must never be renumbered.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
    strum_macros::EnumIter,
)]
#[serde(into = "u64", try_from = "u64")]
#[strum(serialize_all = "snake_case")]
#[repr(u64)]
pub enum ExceptionKind {
    #[default]
    None = 0,
    ExplicitRevert = 1,
    DepositOutOfGas = 2,
    RunOutOfGas = 3,
    CallStackOverflow = 4,
    DataStackUnderflow = 5,
    DataStackOverflow = 6,
    InvalidJumpDestination = 7,
    InvalidInstruction = 8,
    PrecompiledCallError = 9,
    InsufficientBalance = 10,
    WritePermissionViolation = 11,
    ReturnDataOutOfBound = 12,
    ContractAddressCollision = 13,
    MaxCodeSizeExceeded = 14,
    GasUintOverflow = 15,
    EmptyCode = 16,
}

/// Exact-match rules, checked first and in this order.
const EXACT_RULES: &[(&str, ExceptionKind)] = &[
    (MSG_EXECUTION_REVERTED, ExceptionKind::ExplicitRevert),
    (MSG_DEPOSIT_OUT_OF_GAS, ExceptionKind::DepositOutOfGas),
    (MSG_OUT_OF_GAS, ExceptionKind::RunOutOfGas),
    (MSG_MAX_CALL_DEPTH, ExceptionKind::CallStackOverflow),
    (MSG_INSUFFICIENT_BALANCE, ExceptionKind::InsufficientBalance),
    (MSG_WRITE_PROTECTION, ExceptionKind::WritePermissionViolation),
    (MSG_RETURN_DATA_OUT_OF_BOUNDS, ExceptionKind::ReturnDataOutOfBound),
    (
        MSG_CONTRACT_ADDRESS_COLLISION,
        ExceptionKind::ContractAddressCollision,
    ),
    (MSG_MAX_CODE_SIZE_EXCEEDED, ExceptionKind::MaxCodeSizeExceeded),
    (MSG_GAS_UINT_OVERFLOW, ExceptionKind::GasUintOverflow),
    (MSG_EMPTY_CODE, ExceptionKind::EmptyCode),
];

/// Prefix rules, checked after every exact rule. The prefix must be followed by
/// a space and a non-empty single-line detail.
const PREFIX_RULES: &[(&str, ExceptionKind)] = &[
    (PREFIX_STACK_UNDERFLOW, ExceptionKind::DataStackUnderflow),
    (PREFIX_STACK_LIMIT, ExceptionKind::DataStackOverflow),
    (PREFIX_INVALID_JUMP, ExceptionKind::InvalidJumpDestination),
    (PREFIX_INVALID_OPCODE, ExceptionKind::InvalidInstruction),
];

impl ExceptionKind {
    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|kind| kind.code() == code)
    }

    pub fn is_exception(self) -> bool {
        self != Self::None
    }

    /// Classifies a failure message. Never returns [`ExceptionKind::None`]:
    /// anything unrecognised lands in [`ExceptionKind::PrecompiledCallError`].
    pub fn from_message(message: &str) -> Self {
        if let Some((_, kind)) = EXACT_RULES.iter().find(|(text, _)| *text == message) {
            return *kind;
        }
        if let Some((_, kind)) = PREFIX_RULES
            .iter()
            .find(|(prefix, _)| has_detail_after(message, prefix))
        {
            return *kind;
        }
        Self::PrecompiledCallError
    }
}

fn has_detail_after(message: &str, prefix: &str) -> bool {
    message
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(' '))
        .is_some_and(|detail| !detail.is_empty() && !detail.contains('\n'))
}

impl From<ExceptionKind> for u64 {
    fn from(kind: ExceptionKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u64> for ExceptionKind {
    type Error = Error;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| Error::Trace {
            reason: format!("unknown exception code: {code}"),
        })
    }
}

/// Maps a frame's terminal failure signal to `(message, kind)`.
///
/// `None` means the frame succeeded and yields `("", ExceptionKind::None)`.
/// The message is kept verbatim; no case or whitespace normalisation happens.
pub fn classify(failure: Option<&str>) -> (String, ExceptionKind) {
    match failure {
        None => (String::new(), ExceptionKind::None),
        Some(message) => (message.to_string(), ExceptionKind::from_message(message)),
    }
}

/// [`classify`] for interpreters that surface failures as error values.
pub fn classify_error<E: std::fmt::Display + ?Sized>(
    failure: Option<&E>,
) -> (String, ExceptionKind) {
    match failure {
        None => classify(None),
        Some(err) => classify(Some(err.to_string().as_str())),
    }
}
