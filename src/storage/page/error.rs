use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Not enough space in page")]
    InsufficientSpace,
    #[error("Record not found")]
    RecordNotFound,
    #[error("Invalid slot index")]
    InvalidSlot,
    #[error("Record is not deleted")]
    NotDeleted,
}
