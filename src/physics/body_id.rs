/// Identifies a body: the low 23 bits index the body manager's slot array, the next 8 bits hold a
/// sequence number that changes every time the slot is reused.
///
/// Bit 31 is reserved for the broad phase, which uses it to tell bodies and tree nodes apart.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BodyID(u32);

impl BodyID {
    pub const INVALID_BODY_ID: u32 = 0xffff_ffff;
    pub const BROAD_PHASE_BIT: u32 = 0x8000_0000;
    pub const MAX_BODY_INDEX: u32 = 0x7f_ffff;
    pub const MAX_SEQUENCE_NUMBER: u8 = 0xff;
    const SEQUENCE_NUMBER_SHIFT: u32 = 23;

    pub const INVALID: BodyID = BodyID(Self::INVALID_BODY_ID);

    #[inline(always)]
    pub fn new(index: u32, sequence_number: u8) -> Self {
        debug_assert!(index <= Self::MAX_BODY_INDEX, "Body index out of range!");
        Self(index | ((sequence_number as u32) << Self::SEQUENCE_NUMBER_SHIFT))
    }

    /// Reinterprets a raw 32 bit value as an id.
    #[inline(always)]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub fn index(self) -> u32 {
        self.0 & Self::MAX_BODY_INDEX
    }

    #[inline(always)]
    pub fn sequence_number(self) -> u8 {
        ((self.0 >> Self::SEQUENCE_NUMBER_SHIFT) & Self::MAX_SEQUENCE_NUMBER as u32) as u8
    }

    #[inline(always)]
    pub fn is_invalid(self) -> bool {
        self.0 == Self::INVALID_BODY_ID
    }
}

impl Default for BodyID {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for BodyID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BodyID<{}:{}>", self.index(), self.sequence_number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let id = BodyID::new(123, 7);
        assert_eq!(id.index(), 123);
        assert_eq!(id.sequence_number(), 7);
        assert_eq!(id.raw() & BodyID::BROAD_PHASE_BIT, 0);

        let id = BodyID::new(BodyID::MAX_BODY_INDEX, BodyID::MAX_SEQUENCE_NUMBER);
        assert_eq!(id.index(), BodyID::MAX_BODY_INDEX);
        assert_eq!(id.sequence_number(), 0xff);
        assert!(!id.is_invalid());
        assert_eq!(id.raw() & BodyID::BROAD_PHASE_BIT, 0);
    }

    #[test]
    fn test_default_is_invalid() {
        assert!(BodyID::default().is_invalid());
    }

    #[test]
    fn test_ordering_follows_raw_value() {
        let a = BodyID::new(5, 0);
        let b = BodyID::new(2, 1);
        assert!(a < b);
        assert!(BodyID::new(1, 0) < BodyID::new(2, 0));
    }

    #[test]
    #[should_panic(expected = "Body index out of range!")]
    fn test_index_out_of_range() {
        let _ = BodyID::new(BodyID::MAX_BODY_INDEX + 1, 0);
    }
}
