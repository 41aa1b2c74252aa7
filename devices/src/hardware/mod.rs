pub mod console;
pub mod memcard;
pub mod ram;

pub use console::Console;
pub use memcard::{CardImage, Memcard};
pub use ram::Ram;

/// Backing storage that can't be allocated on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("device storage of {bytes} bytes is too large")]
pub struct StorageTooLarge {
    pub bytes: u128,
}

/// Zero filled storage of `bytes` bytes, without aborting on absurd sizes.
fn zeroed(bytes: u128) -> Result<Vec<u8>, StorageTooLarge> {
    let len = usize::try_from(bytes).map_err(|_| StorageTooLarge { bytes })?;
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| StorageTooLarge { bytes })?;
    data.resize(len, 0);

    Ok(data)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn zeroed_storage() {
        assert_eq!(zeroed(4), Ok(vec![0; 4]));
        assert_eq!(zeroed(0), Ok(Vec::new()));
    }

    #[test]
    fn oversized_storage_is_refused() {
        let bytes = u128::from(u64::MAX) * 512;

        assert_eq!(zeroed(bytes), Err(StorageTooLarge { bytes }));
        assert!(zeroed(u128::from(u64::MAX)).is_err());
    }
}
