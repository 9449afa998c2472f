use std::fmt::{Debug, Formatter};
use std::ops::Deref;

/// A vector with a compile time capacity. Exceeding the capacity is a fatal error.
#[derive(Copy, Clone)]
pub struct FixedVec<T: Copy + Default, const N: usize> {
    data: [T; N],
    len: usize,
}

impl<T: Copy + Default, const N: usize> FixedVec<T, N> {
    pub fn new() -> Self {
        Self {
            data: [T::default(); N],
            len: 0,
        }
    }

    pub fn from_slice(values: &[T]) -> Self {
        let mut result = Self::new();
        result.assign(values);
        result
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn push(&mut self, value: T) {
        if self.len == N {
            log::error!("FixedVec capacity of {} exceeded", N);
            panic!()
        }
        self.data[self.len] = value;
        self.len += 1;
    }

    /// Stores `value` at `index`, growing the vector with default values if needed.
    pub fn set(&mut self, index: usize, value: T) {
        if index >= N {
            log::error!("FixedVec index {} out of capacity {}", index, N);
            panic!()
        }
        for i in self.len..index {
            self.data[i] = T::default();
        }
        self.data[index] = value;
        self.len = self.len.max(index + 1);
    }

    /// Replaces the content with `values`.
    pub fn assign(&mut self, values: &[T]) {
        if values.len() > N {
            log::error!("Tried to store {} values in FixedVec with capacity {}", values.len(), N);
            panic!()
        }
        self.data[..values.len()].copy_from_slice(values);
        self.len = values.len();
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.len]
    }
}

impl<T: Copy + Default, const N: usize> Default for FixedVec<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const N: usize> Deref for FixedVec<T, N> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T: Copy + Default + Debug, const N: usize> Debug for FixedVec<T, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_set() {
        let mut vec: FixedVec<u32, 4> = FixedVec::new();
        vec.push(3);
        vec.set(2, 7);

        assert_eq!(vec.as_slice(), &[3, 0, 7]);
        vec.assign(&[1, 2]);
        assert_eq!(vec.len(), 2);
        vec.clear();
        assert!(vec.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_push_overflow() {
        let mut vec: FixedVec<u8, 2> = FixedVec::new();
        vec.push(0);
        vec.push(1);
        vec.push(2);
    }

    #[test]
    #[should_panic]
    fn test_set_out_of_capacity() {
        let mut vec: FixedVec<u8, 2> = FixedVec::new();
        vec.set(2, 1);
    }
}
