use crate::prelude::{CoreError, CoreResult};

/// Allocates a zero-filled working buffer, reporting exhaustion as
/// [`CoreError::Allocation`] instead of aborting the process.
pub fn zeroed<T: Clone + Default>(len: usize, what: &'static str) -> CoreResult<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| CoreError::Allocation {
            what,
            elements: len,
        })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}
