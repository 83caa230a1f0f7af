//! # Opcodes
//!
//! Decoded instruction set. Families with an operand count (`PUSHn`, `DUPn`,
//! `SWAPn`, `LOGn`) carry it in the variant; opcodes the engine recognises but
//! does not run decode to [`Opcode::Unsupported`].

/// One decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Opcode {
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    SDiv,
    Mod,
    SMod,
    AddMod,
    MulMod,
    Exp,
    SignExtend,

    Lt,
    Gt,
    SLt,
    SGt,
    Eq,
    IsZero,
    And,
    Or,
    Xor,
    Not,
    Byte,
    Shl,
    Shr,
    Sar,

    Keccak256,

    Address,
    Balance,
    Origin,
    Caller,
    CallValue,
    CallDataLoad,
    CallDataSize,
    CallDataCopy,
    CodeSize,
    CodeCopy,
    GasPrice,
    ExtCodeSize,
    ReturnDataSize,
    ReturnDataCopy,

    BlockHash,
    Coinbase,
    Timestamp,
    Number,
    PrevRandao,
    GasLimit,
    ChainId,
    SelfBalance,
    BaseFee,

    Pop,
    MLoad,
    MStore,
    MStore8,
    SLoad,
    SStore,
    Jump,
    JumpI,
    Pc,
    MSize,
    Gas,
    JumpDest,

    /// `PUSH0`..`PUSH32`; the payload is the immediate length.
    Push(u8),
    /// `DUP1`..`DUP16`; the payload is the 1-based depth.
    Dup(u8),
    /// `SWAP1`..`SWAP16`.
    Swap(u8),
    /// `LOG0`..`LOG4`; the payload is the topic count.
    Log(u8),

    Return,
    Revert,
    Invalid,

    /// Message calls, creation, self-destruct, transient storage and the
    /// remaining account-introspection opcodes.
    Unsupported(u8),
}

impl Opcode {
    /// Decodes a byte. Returns `None` for undefined opcodes.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        let op = match byte {
            0x00 => Self::Stop,
            0x01 => Self::Add,
            0x02 => Self::Mul,
            0x03 => Self::Sub,
            0x04 => Self::Div,
            0x05 => Self::SDiv,
            0x06 => Self::Mod,
            0x07 => Self::SMod,
            0x08 => Self::AddMod,
            0x09 => Self::MulMod,
            0x0A => Self::Exp,
            0x0B => Self::SignExtend,

            0x10 => Self::Lt,
            0x11 => Self::Gt,
            0x12 => Self::SLt,
            0x13 => Self::SGt,
            0x14 => Self::Eq,
            0x15 => Self::IsZero,
            0x16 => Self::And,
            0x17 => Self::Or,
            0x18 => Self::Xor,
            0x19 => Self::Not,
            0x1A => Self::Byte,
            0x1B => Self::Shl,
            0x1C => Self::Shr,
            0x1D => Self::Sar,

            0x20 => Self::Keccak256,

            0x30 => Self::Address,
            0x31 => Self::Balance,
            0x32 => Self::Origin,
            0x33 => Self::Caller,
            0x34 => Self::CallValue,
            0x35 => Self::CallDataLoad,
            0x36 => Self::CallDataSize,
            0x37 => Self::CallDataCopy,
            0x38 => Self::CodeSize,
            0x39 => Self::CodeCopy,
            0x3A => Self::GasPrice,
            0x3B => Self::ExtCodeSize,
            0x3D => Self::ReturnDataSize,
            0x3E => Self::ReturnDataCopy,

            0x40 => Self::BlockHash,
            0x41 => Self::Coinbase,
            0x42 => Self::Timestamp,
            0x43 => Self::Number,
            0x44 => Self::PrevRandao,
            0x45 => Self::GasLimit,
            0x46 => Self::ChainId,
            0x47 => Self::SelfBalance,
            0x48 => Self::BaseFee,

            0x50 => Self::Pop,
            0x51 => Self::MLoad,
            0x52 => Self::MStore,
            0x53 => Self::MStore8,
            0x54 => Self::SLoad,
            0x55 => Self::SStore,
            0x56 => Self::Jump,
            0x57 => Self::JumpI,
            0x58 => Self::Pc,
            0x59 => Self::MSize,
            0x5A => Self::Gas,
            0x5B => Self::JumpDest,

            0x5F..=0x7F => Self::Push(byte - 0x5F),
            0x80..=0x8F => Self::Dup(byte - 0x7F),
            0x90..=0x9F => Self::Swap(byte - 0x8F),
            0xA0..=0xA4 => Self::Log(byte - 0xA0),

            0xF3 => Self::Return,
            0xFD => Self::Revert,
            0xFE => Self::Invalid,

            0x3C | 0x3F | 0x5C | 0x5D | 0x5E | 0xF0 | 0xF1 | 0xF2 | 0xF4 | 0xF5 | 0xFA | 0xFF => {
                Self::Unsupported(byte)
            }

            _ => return None,
        };
        Some(op)
    }

    /// Immediate bytes following the opcode.
    #[must_use]
    pub fn immediate_size(self) -> usize {
        match self {
            Self::Push(n) => usize::from(n),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families_carry_operand() {
        assert_eq!(Opcode::from_byte(0x5F), Some(Opcode::Push(0)));
        assert_eq!(Opcode::from_byte(0x7F), Some(Opcode::Push(32)));
        assert_eq!(Opcode::from_byte(0x80), Some(Opcode::Dup(1)));
        assert_eq!(Opcode::from_byte(0x9F), Some(Opcode::Swap(16)));
        assert_eq!(Opcode::from_byte(0xA4), Some(Opcode::Log(4)));
    }

    #[test]
    fn test_unsupported_and_undefined() {
        assert_eq!(Opcode::from_byte(0xF1), Some(Opcode::Unsupported(0xF1)));
        assert_eq!(Opcode::from_byte(0x0C), None);
        assert_eq!(Opcode::from_byte(0xFE), Some(Opcode::Invalid));
    }

    #[test]
    fn test_immediate_size() {
        assert_eq!(Opcode::Push(4).immediate_size(), 4);
        assert_eq!(Opcode::Add.immediate_size(), 0);
    }
}
