use tessel_core::DataError;
use tessel_dom::{DomError, NodeId};
use thiserror::Error;

use crate::config::ConfigError;
use crate::instruction::InstructionError;
use crate::pattern::PatternError;
use crate::runtime::{RepeaterId, SourceId};
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum RepeatError {
    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Instruction(#[from] InstructionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("repeater {0:?} does not exist")]
    UnknownRepeater(RepeaterId),

    #[error("data source {0:?} does not exist")]
    UnknownSource(SourceId),

    #[error("node {0:?} is already the target of another repeater")]
    TargetTaken(NodeId),

    #[error("target {0:?} must be empty before showing")]
    TargetNotEmpty(NodeId),

    /// Target and data source disagree; recovered by a scheduled rebuild
    #[error("out of sync: {0}")]
    Desync(String),
}

pub type Result<T> = std::result::Result<T, RepeatError>;
