// src/dta/types.rs

use anyhow::{bail, Result};
use arrow::datatypes::DataType;

/// Byte order recorded in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "HILO" / "MSF"
    Big,
    /// "LOHI" / "LSF"
    Little,
}

impl ByteOrder {
    pub fn u16(self, b: &[u8]) -> u16 {
        let a = [b[0], b[1]];
        match self {
            ByteOrder::Big => u16::from_be_bytes(a),
            ByteOrder::Little => u16::from_le_bytes(a),
        }
    }

    pub fn u32(self, b: &[u8]) -> u32 {
        let a = [b[0], b[1], b[2], b[3]];
        match self {
            ByteOrder::Big => u32::from_be_bytes(a),
            ByteOrder::Little => u32::from_le_bytes(a),
        }
    }

    pub fn u64(self, b: &[u8]) -> u64 {
        let mut a = [0u8; 8];
        a.copy_from_slice(&b[..8]);
        match self {
            ByteOrder::Big => u64::from_be_bytes(a),
            ByteOrder::Little => u64::from_le_bytes(a),
        }
    }

    pub fn i16(self, b: &[u8]) -> i16 {
        self.u16(b) as i16
    }

    pub fn i32(self, b: &[u8]) -> i32 {
        self.u32(b) as i32
    }

    pub fn f32(self, b: &[u8]) -> f32 {
        f32::from_bits(self.u32(b))
    }

    pub fn f64(self, b: &[u8]) -> f64 {
        f64::from_bits(self.u64(b))
    }
}

/// The `.dta` releases this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Release {
    /// Stata 8–9
    R113,
    /// Stata 10–11
    R114,
    /// Stata 12
    R115,
    /// Stata 13
    R117,
    /// Stata 14–18
    R118,
    /// Stata 15+ with more than 32 767 variables
    R119,
}

impl Release {
    pub fn from_number(n: u16) -> Result<Self> {
        Ok(match n {
            113 => Release::R113,
            114 => Release::R114,
            115 => Release::R115,
            117 => Release::R117,
            118 => Release::R118,
            119 => Release::R119,
            other => bail!("unsupported .dta release {}", other),
        })
    }

    pub fn number(self) -> u16 {
        match self {
            Release::R113 => 113,
            Release::R114 => 114,
            Release::R115 => 115,
            Release::R117 => 117,
            Release::R118 => 118,
            Release::R119 => 119,
        }
    }

    /// Releases from 117 on use the `<stata_dta>` tagged layout.
    pub fn is_tagged(self) -> bool {
        self >= Release::R117
    }

    /// Releases from 118 on store text as UTF-8.
    pub fn is_utf8(self) -> bool {
        self >= Release::R118
    }

    pub fn varname_len(self) -> usize {
        if self.is_utf8() {
            129
        } else {
            33
        }
    }

    pub fn format_len(self) -> usize {
        match self {
            Release::R113 => 12,
            Release::R114 | Release::R115 | Release::R117 => 49,
            Release::R118 | Release::R119 => 57,
        }
    }

    pub fn varlabel_len(self) -> usize {
        if self.is_utf8() {
            321
        } else {
            81
        }
    }
}

/// Largest fixed-width string type.
pub const MAX_STR_WIDTH: usize = 2045;

/// Storage type of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Str(u16),
    StrL,
    Byte,
    Int,
    Long,
    Float,
    Double,
}

impl StorageType {
    /// Decode a type code from the 113–115 one-byte typlist.
    pub fn from_old_code(code: u8) -> Result<Self> {
        Ok(match code {
            1..=244 => StorageType::Str(code as u16),
            251 => StorageType::Byte,
            252 => StorageType::Int,
            253 => StorageType::Long,
            254 => StorageType::Float,
            255 => StorageType::Double,
            other => bail!("unknown storage type code {}", other),
        })
    }

    /// Decode a type code from the 117+ two-byte `<variable_types>` list.
    pub fn from_code(code: u16) -> Result<Self> {
        Ok(match code {
            1..=2045 => StorageType::Str(code),
            32768 => StorageType::StrL,
            65526 => StorageType::Double,
            65527 => StorageType::Float,
            65528 => StorageType::Long,
            65529 => StorageType::Int,
            65530 => StorageType::Byte,
            other => bail!("unknown storage type code {}", other),
        })
    }

    pub fn code(self) -> u16 {
        match self {
            StorageType::Str(n) => n,
            StorageType::StrL => 32768,
            StorageType::Double => 65526,
            StorageType::Float => 65527,
            StorageType::Long => 65528,
            StorageType::Int => 65529,
            StorageType::Byte => 65530,
        }
    }

    /// Bytes one value occupies in a data record.
    pub fn width(self) -> usize {
        match self {
            StorageType::Str(n) => n as usize,
            StorageType::StrL => 8,
            StorageType::Byte => 1,
            StorageType::Int => 2,
            StorageType::Long => 4,
            StorageType::Float => 4,
            StorageType::Double => 8,
        }
    }

    pub fn arrow_type(self) -> DataType {
        match self {
            StorageType::Str(_) | StorageType::StrL => DataType::Utf8,
            StorageType::Byte => DataType::Int8,
            StorageType::Int => DataType::Int16,
            StorageType::Long => DataType::Int32,
            StorageType::Float => DataType::Float32,
            StorageType::Double => DataType::Float64,
        }
    }

    pub fn default_format(self) -> String {
        match self {
            StorageType::Str(n) => format!("%{}s", n),
            StorageType::StrL => "%9s".to_string(),
            StorageType::Byte => "%8.0g".to_string(),
            StorageType::Int => "%8.0g".to_string(),
            StorageType::Long => "%12.0g".to_string(),
            StorageType::Float => "%9.0g".to_string(),
            StorageType::Double => "%10.0g".to_string(),
        }
    }
}

// Largest non-missing value of each integer type; everything above is `.`,
// `.a` … `.z`.
pub const BYTE_MAX: i8 = 100;
pub const INT_MAX: i16 = 32_740;
pub const LONG_MAX: i32 = 2_147_483_620;
pub const BYTE_MIN: i8 = -127;
pub const INT_MIN: i16 = -32_767;
pub const LONG_MIN: i32 = -2_147_483_647;

// System missing `.` for each type.
pub const BYTE_MISSING: i8 = 101;
pub const INT_MISSING: i16 = 32_741;
pub const LONG_MISSING: i32 = 2_147_483_621;
pub const FLOAT_MISSING_BITS: u32 = 0x7f00_0000;
pub const DOUBLE_MISSING_BITS: u64 = 0x7fe0_0000_0000_0000;

pub fn float_is_missing(v: f32) -> bool {
    // 2^127 and above (and NaN, which Stata never writes) are missing codes
    v.is_nan() || v >= f32::from_bits(FLOAT_MISSING_BITS)
}

pub fn double_is_missing(v: f64) -> bool {
    v.is_nan() || v >= f64::from_bits(DOUBLE_MISSING_BITS)
}

/// Decode a NUL-terminated fixed-width text field.
pub fn decode_text(raw: &[u8], release: Release) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let bytes = &raw[..end];
    if release.is_utf8() {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        // Latin-1: every byte maps to the code point of the same value
        bytes.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_thresholds() {
        assert!(!float_is_missing(1.0e38));
        assert!(float_is_missing(f32::from_bits(FLOAT_MISSING_BITS)));
        assert!(!double_is_missing(8.9e307));
        assert!(double_is_missing(f64::from_bits(DOUBLE_MISSING_BITS)));
        assert!(double_is_missing(f64::NAN));
    }

    #[test]
    fn type_codes() -> Result<()> {
        assert_eq!(StorageType::from_code(65530)?, StorageType::Byte);
        assert_eq!(StorageType::from_code(12)?, StorageType::Str(12));
        assert_eq!(StorageType::from_old_code(253)?, StorageType::Long);
        assert!(StorageType::from_code(40000).is_err());
        assert_eq!(StorageType::Double.code(), 65526);
        Ok(())
    }

    #[test]
    fn latin1_text_before_118() {
        let raw = [b'a', 0xf1, b'o', 0, b'x'];
        assert_eq!(decode_text(&raw, Release::R114), "año");
        assert_eq!(decode_text("año\0\0".as_bytes(), Release::R118), "año");
    }
}
