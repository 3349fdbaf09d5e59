use crate::TransferError;

/// Largest chunk a single remote call may carry: 256 MiB.
pub const MAX_CHUNK_SIZE: usize = 256 * 1024 * 1024;

/// Rejects a chunk size of zero or above [`MAX_CHUNK_SIZE`].
pub fn validate_chunk_size(chunk_size: usize) -> Result<(), TransferError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(TransferError::InvalidChunkSize(chunk_size));
    }
    Ok(())
}

/// Rejects an empty or blank container or file id.
///
/// `kind` names the id in the error message.
pub fn validate_remote_id(kind: &str, id: &str) -> Result<(), TransferError> {
    if id.trim().is_empty() {
        return Err(TransferError::InvalidId(format!("empty {kind} id")));
    }
    if id.chars().any(char::is_control) {
        return Err(TransferError::InvalidId(format!(
            "{kind} id contains control characters: {id:?}"
        )));
    }
    Ok(())
}
