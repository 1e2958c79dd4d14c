//! The 68k register file and its wire encoding.
//!
//! Register index is positional in the protocol (`p`/`P` commands and the
//! `g`/`G` image), not name-addressed, so the order here is load-bearing:
//! D0–D7, A0–A7, SR, PC.  Each register is 32 bits, rendered big-endian as
//! eight hex characters.

use std::fmt;
use std::str::FromStr;

use crate::error::GdbError;

/// Number of registers in the `g`/`G` image.
pub const REGISTER_COUNT: usize = 18;

/// Hex characters per register in the wire encoding.
const HEX_PER_REG: usize = 8;

/// One CPU register, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    Sr,
    Pc,
}

impl Register {
    /// Every register in wire order.
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::D0,
        Register::D1,
        Register::D2,
        Register::D3,
        Register::D4,
        Register::D5,
        Register::D6,
        Register::D7,
        Register::A0,
        Register::A1,
        Register::A2,
        Register::A3,
        Register::A4,
        Register::A5,
        Register::A6,
        Register::A7,
        Register::Sr,
        Register::Pc,
    ];

    /// Positional index used by the `p`/`P` commands.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::D0 => "D0",
            Register::D1 => "D1",
            Register::D2 => "D2",
            Register::D3 => "D3",
            Register::D4 => "D4",
            Register::D5 => "D5",
            Register::D6 => "D6",
            Register::D7 => "D7",
            Register::A0 => "A0",
            Register::A1 => "A1",
            Register::A2 => "A2",
            Register::A3 => "A3",
            Register::A4 => "A4",
            Register::A5 => "A5",
            Register::A6 => "A6",
            Register::A7 => "A7",
            Register::Sr => "SR",
            Register::Pc => "PC",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Register::ALL
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown register `{s}`"))
    }
}

// ---------------------------------------------------------------------------
// RegisterFile
// ---------------------------------------------------------------------------

/// A complete snapshot of all registers, as carried by `g`/`G`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterFile {
    values: [u32; REGISTER_COUNT],
}

impl RegisterFile {
    /// Decode the fixed-width hex image of a `g` reply.
    ///
    /// A short reply is a protocol error, not a partial result.
    pub fn decode(image: &str) -> Result<Self, GdbError> {
        const EXPECTED: usize = REGISTER_COUNT * HEX_PER_REG;
        if image.len() < EXPECTED {
            return Err(GdbError::ReplyTooShort {
                expected: EXPECTED,
                actual: image.len(),
            });
        }
        if !image.is_ascii() {
            return Err(GdbError::BadHex(image.to_string()));
        }
        let mut values = [0u32; REGISTER_COUNT];
        for (i, value) in values.iter_mut().enumerate() {
            let field = &image[i * HEX_PER_REG..(i + 1) * HEX_PER_REG];
            *value = u32::from_str_radix(field, 16)
                .map_err(|_| GdbError::BadHex(field.to_string()))?;
        }
        Ok(Self { values })
    }

    /// Encode into the 144-character image carried by `G`.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(REGISTER_COUNT * HEX_PER_REG);
        for value in self.values {
            out.push_str(&format!("{value:08x}"));
        }
        out
    }

    pub fn get(&self, register: Register) -> u32 {
        self.values[register.index()]
    }

    pub fn set(&mut self, register: Register, value: u32) {
        self.values[register.index()] = value;
    }

    pub fn pc(&self) -> u32 {
        self.get(Register::Pc)
    }

    pub fn sr(&self) -> u32 {
        self.get(Register::Sr)
    }
}
