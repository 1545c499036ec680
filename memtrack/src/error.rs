use thiserror::Error;
use vma_tree::TreeError;

use crate::FileId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("unknown memory file: {0}")]
    UnknownFile(FileId),
}
