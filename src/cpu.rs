#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

use std::{fmt::Display, str::FromStr};

use bitfield_struct::bitfield;
use bitflags::bitflags;
use thiserror::Error;

#[macro_export]
macro_rules! nth_bit {
    ($n: expr) => {
        1 << $n
    };
}

bitflags! {
    /// What the memory mover and the vector layout may rely on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuFeatures: u32 {
        /// word and long accesses must sit on even addresses
        const WORD_ALIGN = nth_bit!(0);
        /// unroll block copies to 128 bytes per iteration
        const HEAVY_UNROLL = nth_bit!(1);
        /// 16 byte line bursts
        const MOVE16 = nth_bit!(2);
        /// format word in the exception frame
        const FRAME_FORMAT = nth_bit!(3);
    }
}

#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuModel {
    #[default]
    Mc68000,
    Mc68010,
    Mc68020,
    Mc68030,
    Mc68040,
    Mc68060,
}
impl CpuModel {
    pub const ALL: [Self; 6] = [
        Self::Mc68000,
        Self::Mc68010,
        Self::Mc68020,
        Self::Mc68030,
        Self::Mc68040,
        Self::Mc68060,
    ];

    pub const fn features(self) -> CpuFeatures {
        match self {
            Self::Mc68000 => CpuFeatures::WORD_ALIGN.union(CpuFeatures::HEAVY_UNROLL),
            Self::Mc68010 => CpuFeatures::WORD_ALIGN
                .union(CpuFeatures::HEAVY_UNROLL)
                .union(CpuFeatures::FRAME_FORMAT),
            Self::Mc68020 | Self::Mc68030 => CpuFeatures::HEAVY_UNROLL.union(CpuFeatures::FRAME_FORMAT),
            Self::Mc68040 | Self::Mc68060 => CpuFeatures::MOVE16.union(CpuFeatures::FRAME_FORMAT),
        }
    }
    pub const fn has(self, feature: CpuFeatures) -> bool { self.features().contains(feature) }
    pub const fn part_number(self) -> u32 {
        match self {
            Self::Mc68000 => 68000,
            Self::Mc68010 => 68010,
            Self::Mc68020 => 68020,
            Self::Mc68030 => 68030,
            Self::Mc68040 => 68040,
            Self::Mc68060 => 68060,
        }
    }
}
impl Display for CpuModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "mc{}", self.part_number()) }
}

#[derive(Debug, Clone, Error)]
#[error("unknown cpu model \"{0}\" (expected one of 68000, 68010, 68020, 68030, 68040, 68060)")]
pub struct UnknownCpuModel(pub String);

impl FromStr for CpuModel {
    type Err = UnknownCpuModel;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim_start_matches("mc").trim_start_matches("MC");
        Self::ALL
            .into_iter()
            .find(|model| model.part_number().to_string() == digits)
            .ok_or_else(|| UnknownCpuModel(s.to_owned()))
    }
}

/// Format/vector word pushed by the CPU; the low 12 bits are the vector
/// number times four.
#[rustfmt::skip]
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct FormatVector {
    #[bits(12)] pub vector_offset: u16,
    #[bits(4)]  pub format:        u8,
}

/// The part of the exception stack frame dispatch looks at.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    pub sr:     u16,
    pub pc:     u32,
    pub vector: FormatVector,
}
impl TrapFrame {
    pub const fn new(vector_offset: u16) -> Self {
        Self {
            sr:     0x2700,
            pc:     0,
            vector: FormatVector::new().with_vector_offset(vector_offset & 0x0FFF),
        }
    }
    /// Frame as raised for vector number `vector`.
    ///
    /// # Panics
    ///
    /// Panics if `vector` does not fit the 12-bit vector offset.
    pub const fn for_vector(vector: u32) -> Self {
        assert!(vector < 0x400, "vector number does not fit the format word");
        Self::new((vector * 4) as u16)
    }
    pub const fn with_pc(self, pc: u32) -> Self { Self { pc, ..self } }
    pub const fn vector_offset(&self) -> u16 { self.vector.vector_offset() }
    pub const fn vector_number(&self) -> u32 { self.vector.vector_offset() as u32 / 4 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_sets_follow_the_family() {
        assert!(CpuModel::Mc68000.has(CpuFeatures::WORD_ALIGN));
        assert!(CpuModel::Mc68010.has(CpuFeatures::WORD_ALIGN));
        assert!(!CpuModel::Mc68020.has(CpuFeatures::WORD_ALIGN));
        assert!(CpuModel::Mc68030.has(CpuFeatures::HEAVY_UNROLL));
        assert!(!CpuModel::Mc68040.has(CpuFeatures::HEAVY_UNROLL));
        assert!(CpuModel::Mc68060.has(CpuFeatures::MOVE16));
        assert!(!CpuModel::Mc68000.has(CpuFeatures::FRAME_FORMAT));
    }

    #[test]
    fn parses_part_numbers() {
        assert_eq!("68040".parse::<CpuModel>().unwrap(), CpuModel::Mc68040);
        assert_eq!("mc68010".parse::<CpuModel>().unwrap(), CpuModel::Mc68010);
        assert!("68k".parse::<CpuModel>().is_err());
        assert_eq!(CpuModel::Mc68060.to_string(), "mc68060");
    }

    #[test]
    fn frame_vector_number_is_offset_over_four() {
        let frame = TrapFrame::new(112);
        assert_eq!(frame.vector_offset(), 112);
        assert_eq!(frame.vector_number(), 28);
        assert_eq!(TrapFrame::for_vector(200).vector_offset(), 800);
        assert_eq!(frame.vector.format(), 0);
        assert_eq!(TrapFrame::for_vector(1023).vector_number(), 1023);
    }

    #[test]
    #[should_panic(expected = "vector number does not fit the format word")]
    fn vector_numbers_past_the_offset_field_are_refused() { let _ = TrapFrame::for_vector(1024); }
}
