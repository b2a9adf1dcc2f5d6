use sheetbatch_common::TaggedValue;

use crate::CodecError;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Reserved = 1,
    /// Run the named operation in the message value over the parameters.
    ComputeRequest = 2,
    Results = 3,
    /// Keep the parameters resident on the compute device.
    DeviceStore = 4,
    DeviceRetrieve = 5,
    /// Compute a whole workbook; the message value is `src|dst`.
    ComputeFile = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Reserved,
            2 => Self::ComputeRequest,
            3 => Self::Results,
            4 => Self::DeviceStore,
            5 => Self::DeviceRetrieve,
            6 => Self::ComputeFile,
            other => return Err(CodecError::UnknownMessageType(other)),
        })
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

/// One request or response crossing the process boundary.
///
/// Empty lists and an empty message value do not survive encoding: they
/// are written as count 0 / empty string and decode as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_type: MessageType,
    pub message_value: Option<String>,
    /// Number of formula instances the parameters describe.
    pub instances: i32,
    pub num_parameters: i32,
    /// `parameters[p][n]` is parameter `p` of instance `n`.
    pub parameters: Option<Vec<Vec<TaggedValue>>>,
    pub results: Option<Vec<TaggedValue>>,
}

impl Envelope {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            message_value: None,
            instances: 0,
            num_parameters: 0,
            parameters: None,
            results: None,
        }
    }

    /// A compute request for `op` over `parameters`, one column per parameter.
    pub fn compute(op: impl Into<String>, instances: usize, parameters: Vec<Vec<TaggedValue>>) -> Self {
        Self {
            message_type: MessageType::ComputeRequest,
            message_value: Some(op.into()),
            instances: clamp(instances),
            num_parameters: clamp(parameters.len()),
            parameters: (!parameters.is_empty()).then_some(parameters),
            results: None,
        }
    }

    pub fn compute_file(src: &str, dst: &str) -> Self {
        Self::new(MessageType::ComputeFile).with_value(format!("{src}|{dst}"))
    }

    pub fn results(results: Vec<TaggedValue>) -> Self {
        Self {
            instances: clamp(results.len()),
            results: (!results.is_empty()).then_some(results),
            ..Self::new(MessageType::Results)
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        self.message_value = (!value.is_empty()).then_some(value);
        self
    }

    pub fn value(&self) -> &str {
        self.message_value.as_deref().unwrap_or_default()
    }
}

fn clamp(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
