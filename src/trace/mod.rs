pub mod record;

use serde::{Deserialize, Serialize};

use crate::exceptions::{self, ExceptionKind};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CallType {
    Create,
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
}

impl CallType {
    pub fn is_create(self) -> bool {
        self == Self::Create
    }
}

/// Receipt-style status: 0 for failure, 1 for success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u64", from = "u64")]
pub enum StatusCode {
    #[default]
    Failure,
    Success,
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<StatusCode> for u64 {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::Failure => 0,
            StatusCode::Success => 1,
        }
    }
}

impl From<u64> for StatusCode {
    fn from(code: u64) -> Self {
        if code == 0 {
            Self::Failure
        } else {
            Self::Success
        }
    }
}

/// One executed instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// 1-based position within the owning frame.
    pub step_num: u64,
    pub pc: u64,
    pub op_code: String,
    /// Immediate operand, e.g. the pushed value of a `PUSHn`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immediate: Option<String>,
    pub gas_remaining: u64,
}

/// Inputs known when a call frame is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStart {
    pub call_type: CallType,
    pub from: String,
    /// `None` for creations until the new address is known.
    pub to: Option<String>,
    /// Transferred wei, decimal.
    pub value: String,
    pub input: Vec<u8>,
    pub gas_limit: u64,
}

/// Terminal state of a call frame as reported by the interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    /// Interpreter failure text; `None` when the frame succeeded.
    pub failure: Option<String>,
    pub gas_remaining: u64,
    /// Address produced by a successful creation.
    pub created_address: Option<String>,
}

impl FrameOutcome {
    pub fn success(gas_remaining: u64) -> Self {
        Self {
            failure: None,
            gas_remaining,
            created_address: None,
        }
    }

    pub fn failure(message: impl Into<String>, gas_remaining: u64) -> Self {
        Self {
            failure: Some(message.into()),
            gas_remaining,
            created_address: None,
        }
    }

    pub fn with_created_address(mut self, address: impl Into<String>) -> Self {
        self.created_address = Some(address.into());
        self
    }

    /// Builds an outcome from a gas reading wider than 64 bits.
    ///
    /// A reading that does not fit is stored as zero and the frame fails with
    /// the gas overflow message unless it already carries a failure.
    pub fn from_wide_gas(failure: Option<String>, gas_remaining: u128) -> Self {
        match u64::try_from(gas_remaining) {
            Ok(gas_remaining) => Self {
                failure,
                gas_remaining,
                created_address: None,
            },
            Err(_) => Self {
                failure: failure.or_else(|| Some(exceptions::MSG_GAS_UINT_OVERFLOW.to_string())),
                gas_remaining: 0,
                created_address: None,
            },
        }
    }
}

/// A finalized call frame. Only [`TraceNodeBuilder::finish`] produces one, so the
/// status, error message and exception kind always agree. Fields are read-only
/// outside the crate; the overflow policy is the only writer after finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceNode {
    pub(crate) call_stack_depth: u64,
    pub(crate) call_type: CallType,
    pub(crate) from: String,
    pub(crate) to: Option<String>,
    pub(crate) value: String,
    #[serde(with = "crate::serde_hex")]
    pub(crate) input: Vec<u8>,
    pub(crate) gas_limit: u64,
    pub(crate) gas_remaining: u64,
    pub(crate) status_code: StatusCode,
    pub(crate) created_address: Option<String>,
    pub(crate) error_msg: String,
    pub(crate) error_code: ExceptionKind,
    pub(crate) steps: Vec<ExecutionStep>,
    /// Blob id holding `steps` once they have been detached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) trace_doc_id: Option<String>,
}

impl TraceNode {
    pub fn call_stack_depth(&self) -> u64 {
        self.call_stack_depth
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn gas_remaining(&self) -> u64 {
        self.gas_remaining
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn created_address(&self) -> Option<&str> {
        self.created_address.as_deref()
    }

    /// Raw failure text; empty for a successful frame.
    pub fn error_msg(&self) -> &str {
        &self.error_msg
    }

    pub fn error_code(&self) -> ExceptionKind {
        self.error_code
    }

    /// Empty once the step log has been detached.
    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn trace_doc_id(&self) -> Option<&str> {
        self.trace_doc_id.as_deref()
    }

    pub fn has_exception(&self) -> bool {
        self.error_code.is_exception()
    }

    pub fn is_detached(&self) -> bool {
        self.trace_doc_id.is_some()
    }

    pub fn num_steps(&self) -> u64 {
        self.steps.len() as u64
    }

    /// `None` when the reported remaining gas exceeds the limit.
    pub fn gas_used(&self) -> Option<u64> {
        self.gas_limit.checked_sub(self.gas_remaining)
    }
}

/// An open call frame collecting steps until its outcome is known.
#[derive(Debug, Clone)]
pub struct TraceNodeBuilder {
    depth: u64,
    start: FrameStart,
    steps: Vec<ExecutionStep>,
    capture_steps: bool,
}

impl TraceNodeBuilder {
    pub fn new(depth: u64, start: FrameStart) -> Self {
        Self {
            depth,
            start,
            steps: Vec::new(),
            capture_steps: true,
        }
    }

    /// Drops step-level detail for this frame; `push_step` becomes a no-op.
    pub fn without_steps(mut self) -> Self {
        self.capture_steps = false;
        self.steps.clear();
        self
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub fn captures_steps(&self) -> bool {
        self.capture_steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Appends one instruction; the step number is assigned here.
    pub fn push_step(
        &mut self,
        pc: u64,
        op_code: impl Into<String>,
        immediate: Option<String>,
        gas_remaining: u64,
    ) {
        if !self.capture_steps {
            return;
        }
        let step_num = self.steps.len() as u64 + 1;
        self.steps.push(ExecutionStep {
            step_num,
            pc,
            op_code: op_code.into(),
            immediate,
            gas_remaining,
        });
    }

    pub fn finish(self, outcome: FrameOutcome) -> TraceNode {
        let (error_msg, error_code) = exceptions::classify(outcome.failure.as_deref());
        let status_code = if error_code.is_exception() {
            StatusCode::Failure
        } else {
            StatusCode::Success
        };
        let created_address = if self.start.call_type.is_create() && status_code.is_success() {
            outcome.created_address
        } else {
            None
        };
        let to = match self.start.to {
            Some(to) => Some(to),
            None => created_address.clone(),
        };

        TraceNode {
            call_stack_depth: self.depth,
            call_type: self.start.call_type,
            from: self.start.from,
            to,
            value: self.start.value,
            input: self.start.input,
            gas_limit: self.start.gas_limit,
            gas_remaining: outcome.gas_remaining,
            status_code,
            created_address,
            error_msg,
            error_code,
            steps: self.steps,
            trace_doc_id: None,
        }
    }
}
