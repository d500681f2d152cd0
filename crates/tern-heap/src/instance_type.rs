//! Instance-type byte encoding for strings.
//!
//! Representation and encoding are independent fields of one byte stored in every map:
//!
//! ```text
//!   bit 7     bit 4            bit 3       bits 1..0
//!   not-str   short-external   one-byte    representation
//! ```
//!
//! The representation tags are chosen so that bit 0 alone answers "indirect?" for both cons
//! and sliced strings, and bit 1 then separates sliced from cons. Among direct strings the same
//! bit 1 separates external from sequential, which is why indirection must be ruled out first.

use bitflags::bitflags;

pub const STRING_REPRESENTATION_MASK: u8 = 0x03;
pub const SEQ_STRING_TAG: u8 = 0x00;
pub const CONS_STRING_TAG: u8 = 0x01;
pub const EXTERNAL_STRING_TAG: u8 = 0x02;
pub const SLICED_STRING_TAG: u8 = 0x03;

pub const IS_INDIRECT_STRING_MASK: u8 = 0x01;
pub const SLICED_NOT_CONS_MASK: u8 = 0x02;

pub const STRING_ENCODING_MASK: u8 = 0x08;
pub const TWO_BYTE_STRING_TAG: u8 = 0x00;
pub const ONE_BYTE_STRING_TAG: u8 = 0x08;

pub const SHORT_EXTERNAL_STRING_MASK: u8 = 0x10;

pub const IS_NOT_STRING_MASK: u8 = 0x80;

const _: () = {
    assert!(SEQ_STRING_TAG == 0);
    assert!(TWO_BYTE_STRING_TAG == 0);
    assert!(SHORT_EXTERNAL_STRING_MASK != 0);

    assert!(CONS_STRING_TAG & IS_INDIRECT_STRING_MASK != 0);
    assert!(SLICED_STRING_TAG & IS_INDIRECT_STRING_MASK != 0);
    assert!(EXTERNAL_STRING_TAG & IS_INDIRECT_STRING_MASK == 0);
    assert!(SEQ_STRING_TAG & IS_INDIRECT_STRING_MASK == 0);

    assert!(SLICED_STRING_TAG & SLICED_NOT_CONS_MASK != 0);
    assert!(CONS_STRING_TAG & SLICED_NOT_CONS_MASK == 0);

    assert!(
        (STRING_REPRESENTATION_MASK | STRING_ENCODING_MASK | SHORT_EXTERNAL_STRING_MASK)
            & IS_NOT_STRING_MASK
            == 0
    );
};

/// Character width of a string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    OneByte,
    TwoByte,
}

impl Encoding {
    /// Bytes per code unit.
    #[inline]
    pub const fn char_size(self) -> u64 {
        match self {
            Encoding::OneByte => 1,
            Encoding::TwoByte => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Representation {
    Sequential,
    Cons,
    External,
    Sliced,
}

impl Representation {
    #[inline]
    pub const fn tag(self) -> u8 {
        match self {
            Representation::Sequential => SEQ_STRING_TAG,
            Representation::Cons => CONS_STRING_TAG,
            Representation::External => EXTERNAL_STRING_TAG,
            Representation::Sliced => SLICED_STRING_TAG,
        }
    }
}

/// The raw type byte stored at `Map::INSTANCE_TYPE_OFFSET`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceType(u8);

impl InstanceType {
    /// Type byte of a map describing something other than a string.
    pub const NON_STRING: Self = Self(IS_NOT_STRING_MASK);

    pub const fn string(repr: Representation, encoding: Encoding, short_external: bool) -> Self {
        let mut bits = repr.tag();
        if matches!(encoding, Encoding::OneByte) {
            bits |= ONE_BYTE_STRING_TAG;
        }
        if short_external {
            assert!(
                matches!(repr, Representation::External),
                "only external strings can be short"
            );
            bits |= SHORT_EXTERNAL_STRING_MASK;
        }
        Self(bits)
    }

    #[inline]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_string(self) -> bool {
        self.0 & IS_NOT_STRING_MASK == 0
    }

    #[inline]
    pub fn shape(self) -> ShapeDescriptor {
        ShapeDescriptor::from_instance_type(self.0)
    }
}

bitflags! {
    /// Shape flags decoded from a string's instance type.
    ///
    /// Computed per access and never stored. Bit positions are those of the instance-type byte,
    /// so decoding is a plain reinterpretation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShapeDescriptor: u8 {
        const INDIRECT = IS_INDIRECT_STRING_MASK;
        /// Among indirect strings: sliced. Among direct strings: external.
        const SLICED_NOT_CONS = SLICED_NOT_CONS_MASK;
        const ONE_BYTE = ONE_BYTE_STRING_TAG;
        const SHORT_EXTERNAL = SHORT_EXTERNAL_STRING_MASK;
        const NOT_STRING = IS_NOT_STRING_MASK;
    }
}

impl ShapeDescriptor {
    #[inline]
    pub const fn from_instance_type(raw: u8) -> Self {
        Self::from_bits_retain(raw)
    }

    #[inline]
    pub const fn is_indirect(self) -> bool {
        self.contains(Self::INDIRECT)
    }

    /// Only meaningful when [`Self::is_indirect`] holds.
    #[inline]
    pub const fn is_sliced_not_cons(self) -> bool {
        self.contains(Self::SLICED_NOT_CONS)
    }

    /// Any representation bit set on a string that is not indirect means external.
    #[inline]
    pub const fn is_external(self) -> bool {
        !self.is_indirect() && self.bits() & STRING_REPRESENTATION_MASK != 0
    }

    #[inline]
    pub const fn is_short_external(self) -> bool {
        self.contains(Self::SHORT_EXTERNAL)
    }

    #[inline]
    pub const fn encoding(self) -> Encoding {
        if self.contains(Self::ONE_BYTE) {
            Encoding::OneByte
        } else {
            Encoding::TwoByte
        }
    }

    pub const fn representation(self) -> Representation {
        match self.bits() & STRING_REPRESENTATION_MASK {
            SEQ_STRING_TAG => Representation::Sequential,
            CONS_STRING_TAG => Representation::Cons,
            EXTERNAL_STRING_TAG => Representation::External,
            _ => Representation::Sliced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPRESENTATIONS: [Representation; 4] = [
        Representation::Sequential,
        Representation::Cons,
        Representation::External,
        Representation::Sliced,
    ];

    #[test]
    fn representation_and_encoding_are_independent() {
        for repr in REPRESENTATIONS {
            for encoding in [Encoding::OneByte, Encoding::TwoByte] {
                let shape = InstanceType::string(repr, encoding, false).shape();
                assert_eq!(shape.representation(), repr);
                assert_eq!(shape.encoding(), encoding);
            }
        }
    }

    #[test]
    fn indirect_bit_covers_cons_and_sliced_only() {
        for repr in REPRESENTATIONS {
            let shape = InstanceType::string(repr, Encoding::OneByte, false).shape();
            assert_eq!(
                shape.is_indirect(),
                matches!(repr, Representation::Cons | Representation::Sliced),
                "{repr:?}"
            );
            assert_eq!(
                shape.is_external(),
                repr == Representation::External,
                "{repr:?}"
            );
        }
    }

    #[test]
    fn sliced_not_cons_distinguishes_indirect_shapes() {
        let sliced = InstanceType::string(Representation::Sliced, Encoding::TwoByte, false);
        let cons = InstanceType::string(Representation::Cons, Encoding::TwoByte, false);
        assert!(sliced.shape().is_sliced_not_cons());
        assert!(!cons.shape().is_sliced_not_cons());
    }

    #[test]
    fn short_external_flag() {
        let short = InstanceType::string(Representation::External, Encoding::OneByte, true);
        assert!(short.shape().is_short_external());
        assert!(short.shape().is_external());
        assert!(short.is_string());
        assert!(!InstanceType::NON_STRING.is_string());
    }

    #[test]
    #[should_panic(expected = "only external strings can be short")]
    fn short_sequential_is_rejected() {
        let _ = InstanceType::string(Representation::Sequential, Encoding::OneByte, true);
    }
}
