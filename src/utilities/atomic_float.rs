use std::sync::atomic::{AtomicU32, Ordering};

/// 32 bit float stored in an `AtomicU32`.
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    #[inline(always)]
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline(always)]
    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.bits.load(order))
    }

    #[inline(always)]
    pub fn store(&self, value: f32, order: Ordering) {
        self.bits.store(value.to_bits(), order);
    }

    /// Lowers the stored value to `value` if it is smaller.
    ///
    /// # Returns
    /// True if the stored value changed.
    #[inline(always)]
    pub fn fetch_min(&self, value: f32, order: Ordering) -> bool {
        let mut current = self.bits.load(Ordering::Relaxed);
        while value < f32::from_bits(current) {
            match self
                .bits
                .compare_exchange_weak(current, value.to_bits(), order, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Raises the stored value to `value` if it is larger.
    ///
    /// # Returns
    /// True if the stored value changed.
    #[inline(always)]
    pub fn fetch_max(&self, value: f32, order: Ordering) -> bool {
        let mut current = self.bits.load(Ordering::Relaxed);
        while value > f32::from_bits(current) {
            match self
                .bits
                .compare_exchange_weak(current, value.to_bits(), order, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}
