use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

/// Caller-owned storage that can be lent to a tensor.
///
/// The runtime only ever holds a shared reference to the storage; dropping a tensor never
/// frees it while the caller keeps a clone.
#[derive(Debug, Clone, Default)]
pub struct ExternalBuffer(Arc<RwLock<Box<[u8]>>>);

impl ExternalBuffer {
    /// Creates a zeroed buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::from(vec![0u8; len])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.0.read().expect("failed to lock")
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.0.write().expect("failed to lock")
    }

    /// Returns `true` if both refer to the same storage.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Vec<u8>> for ExternalBuffer {
    fn from(value: Vec<u8>) -> Self {
        Self(Arc::new(RwLock::new(value.into_boxed_slice())))
    }
}

/// Memory attached to a tensor.
#[derive(Debug, Clone)]
pub enum TensorMem {
    /// Allocated by the runtime and released with the tensor.
    Owned(Box<[u8]>),
    /// Lent by the caller; `size` is the byte count declared when it was attached.
    Borrowed { buffer: ExternalBuffer, size: usize },
}

impl TensorMem {
    /// Allocates a zeroed owned buffer.
    pub fn alloc(size: usize) -> Self {
        Self::Owned(vec![0u8; size].into_boxed_slice())
    }

    /// Lends `size` bytes of `buffer`. Fails if the buffer is shorter than that.
    pub fn borrow(buffer: ExternalBuffer, size: usize) -> Result<Self> {
        let available = buffer.len();
        if size > available {
            return Err(Error::External {
                requested: size,
                available,
            });
        }
        Ok(Self::Borrowed { buffer, size })
    }

    /// Declared size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        match self {
            TensorMem::Owned(data) => data.len(),
            TensorMem::Borrowed { size, .. } => *size,
        }
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        matches!(self, TensorMem::Owned(_))
    }

    /// Copies the first `dst.len()` bytes out of the buffer.
    pub fn read(&self, dst: &mut [u8]) -> Result<()> {
        check(dst.len(), self.size())?;
        match self {
            TensorMem::Owned(data) => dst.copy_from_slice(&data[..dst.len()]),
            TensorMem::Borrowed { buffer, .. } => dst.copy_from_slice(&buffer.read()[..dst.len()]),
        }
        Ok(())
    }

    /// Copies `src` into the start of the buffer. Nothing is written if `src` does not fit.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        check(src.len(), self.size())?;
        match self {
            TensorMem::Owned(data) => data[..src.len()].copy_from_slice(src),
            TensorMem::Borrowed { buffer, .. } => {
                buffer.write()[..src.len()].copy_from_slice(src)
            }
        }
        Ok(())
    }
}

#[inline]
fn check(required: usize, available: usize) -> Result<()> {
    match required > available {
        true => Err(Error::BufferTooSmall {
            required,
            available,
        }),
        false => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{ExternalBuffer, TensorMem};
    use crate::error::ErrorKind;

    #[test]
    fn test_owned() {
        let mut mem = TensorMem::alloc(8);
        assert!(mem.is_owned());
        mem.write(&[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 8];
        mem.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 0, 0, 0, 0]);

        let err = mem.write(&[0u8; 9]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMemory);
        mem.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn test_borrowed() {
        let buffer = ExternalBuffer::zeroed(16);
        assert!(TensorMem::borrow(buffer.clone(), 32).is_err());

        let mut mem = TensorMem::borrow(buffer.clone(), 4).unwrap();
        assert!(!mem.is_owned());
        assert_eq!(mem.size(), 4);

        // checked against the declared size, not the backing length
        assert!(mem.write(&[7u8; 8]).is_err());
        mem.write(&[7u8; 4]).unwrap();
        assert_eq!(&buffer.read()[..5], &[7, 7, 7, 7, 0]);

        drop(mem);
        assert_eq!(buffer.len(), 16);
    }
}
