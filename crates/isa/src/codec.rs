//! Minimal GCN encoder/decoder, standing in for the external "ISA codec"
//! collaborator spec.md §6 treats as opaque. This implements the instructions the
//! round-trip scenarios in spec.md §8 exercise (`s_add_u32`, `s_waitcnt`, and a
//! small table of further SOP2/SOPP forms) behind the same trait shape a fuller
//! opcode table would use, so swapping one in later doesn't change callers.

use clrx_gpu::Architecture;
use thiserror::Error;

use crate::defs::{pack_waitcnt, unpack_waitcnt, RegField};

/// An assembled/disassembled operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A raw GCN scalar/vector register-space code (0-127 SGPR, 256+ VGPR, etc.
    /// per the real ISA's single-namespace encoding; this repo keeps SGPR and
    /// VGPR in the same 0-based numbering per register file since it never mixes
    /// them within one operand slot).
    Sgpr(u8),
    Vgpr(u8),
    /// A 32-bit immediate carried as a separate literal-constant dword.
    Imm(i32),
    /// The packed `s_waitcnt` argument.
    WaitCnt { vmcnt: Option<u32>, expcnt: Option<u32>, lgkmcnt: Option<u32> },
}

/// One parsed assembly line, ready for encoding.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub mnemonic: String,
    pub operands: Vec<Operand>,
}

/// A bit range within the encoded instruction that a given operand was written
/// into, so the assembler's format handlers/expression engine can attach
/// relocations to the right slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub field: RegField,
    pub bit_offset: u8,
    pub bit_width: u8,
}

/// A decoded instruction.
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub length: usize,
}

/// Error raised by the ISA codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IsaError {
    #[error("`{0}` is not a recognized GCN mnemonic")]
    UnknownMnemonic(String),
    #[error("`{0}` expects {1} operands")]
    WrongOperandCount(String, usize),
    #[error("not enough bytes to decode an instruction at this position")]
    Truncated,
    #[error("`{0:08x}` does not decode to any known instruction")]
    UnknownEncoding(u32),
}

/// Maximum size, in bytes, any single instruction can encode to on `architecture`.
/// GCN instructions are at most one 32-bit opcode dword plus one 32-bit literal.
pub fn max_encoded_size(_architecture: Architecture) -> usize {
    8
}

#[derive(Clone, Copy)]
struct Sop2Def {
    mnemonic: &'static str,
    opcode: u32,
}

const SOP2_TABLE: &[Sop2Def] = &[
    Sop2Def { mnemonic: "s_add_u32", opcode: 0 },
    Sop2Def { mnemonic: "s_sub_u32", opcode: 1 },
    Sop2Def { mnemonic: "s_add_i32", opcode: 2 },
    Sop2Def { mnemonic: "s_sub_i32", opcode: 3 },
    Sop2Def { mnemonic: "s_addc_u32", opcode: 4 },
    Sop2Def { mnemonic: "s_subb_u32", opcode: 5 },
    Sop2Def { mnemonic: "s_min_i32", opcode: 6 },
    Sop2Def { mnemonic: "s_min_u32", opcode: 7 },
    Sop2Def { mnemonic: "s_max_i32", opcode: 8 },
    Sop2Def { mnemonic: "s_max_u32", opcode: 9 },
    Sop2Def { mnemonic: "s_and_b32", opcode: 14 },
    Sop2Def { mnemonic: "s_or_b32", opcode: 15 },
    Sop2Def { mnemonic: "s_xor_b32", opcode: 16 },
    Sop2Def { mnemonic: "s_lshl_b32", opcode: 25 },
    Sop2Def { mnemonic: "s_lshr_b32", opcode: 27 },
    Sop2Def { mnemonic: "s_mul_i32", opcode: 38 },
];

const SOP2_TAG: u32 = 0b10;
const SOPP_TAG9: u32 = 0b101111111;

/// `s_waitcnt`'s SOPP opcode.
const SOPP_OP_WAITCNT: u32 = 0xc;
/// `s_endpgm`'s SOPP opcode.
const SOPP_OP_ENDPGM: u32 = 0x1;
/// `s_nop`'s SOPP opcode.
const SOPP_OP_NOP: u32 = 0x0;
/// `s_barrier`'s SOPP opcode.
const SOPP_OP_BARRIER: u32 = 0xa;

/// Encode one parsed line to its GCN bytes, plus the bit ranges each register
/// operand landed in (so relocations can later be attached to the right slot).
pub fn encode(_architecture: Architecture, line: &ParsedLine) -> Result<(Vec<u8>, Vec<FieldRef>), IsaError> {
    if let Some(def) = SOP2_TABLE.iter().find(|def| def.mnemonic == line.mnemonic) {
        if line.operands.len() != 3 {
            return Err(IsaError::WrongOperandCount(line.mnemonic.clone(), 3));
        }
        let sdst = reg_code(&line.operands[0])?;
        let ssrc0 = reg_code(&line.operands[1])?;
        let ssrc1 = reg_code(&line.operands[2])?;
        let word = (SOP2_TAG << 30) | (def.opcode << 23) | ((sdst as u32) << 16) | ((ssrc1 as u32) << 8) | ssrc0 as u32;
        let refs = vec![
            FieldRef { field: RegField::Sdst, bit_offset: 16, bit_width: 7 },
            FieldRef { field: RegField::Ssrc0, bit_offset: 0, bit_width: 8 },
            FieldRef { field: RegField::Ssrc1, bit_offset: 8, bit_width: 8 },
        ];
        return Ok((word.to_le_bytes().to_vec(), refs));
    }

    match line.mnemonic.as_str() {
        "s_waitcnt" => {
            let Some(Operand::WaitCnt { vmcnt, expcnt, lgkmcnt }) = line.operands.first() else {
                return Err(IsaError::WrongOperandCount(line.mnemonic.clone(), 1));
            };
            let simm16 = pack_waitcnt(vmcnt.unwrap_or(0xf), expcnt.unwrap_or(0x7), lgkmcnt.unwrap_or(0xf));
            Ok(encode_sopp(SOPP_OP_WAITCNT, simm16))
        }
        "s_endpgm" => Ok(encode_sopp(SOPP_OP_ENDPGM, 0)),
        "s_nop" => {
            let simm16 = match line.operands.first() {
                Some(Operand::Imm(value)) => *value as u16,
                _ => 0,
            };
            Ok(encode_sopp(SOPP_OP_NOP, simm16))
        }
        "s_barrier" => Ok(encode_sopp(SOPP_OP_BARRIER, 0)),
        other => Err(IsaError::UnknownMnemonic(other.to_owned())),
    }
}

fn encode_sopp(opcode: u32, simm16: u16) -> (Vec<u8>, Vec<FieldRef>) {
    let word = (SOPP_TAG9 << 23) | (opcode << 16) | simm16 as u32;
    (word.to_le_bytes().to_vec(), vec![FieldRef { field: RegField::SoppSimm16, bit_offset: 0, bit_width: 16 }])
}

fn reg_code(operand: &Operand) -> Result<u8, IsaError> {
    match operand {
        Operand::Sgpr(code) => Ok(*code),
        other => Err(IsaError::WrongOperandCount(format!("{other:?}"), 1)),
    }
}

/// Decode one instruction at `bytes[..]`, whose first byte is at virtual address
/// `pc` (only used by callers wanting PC-relative branch targets; this minimal
/// table has no branch opcode yet).
pub fn decode(_architecture: Architecture, bytes: &[u8], _pc: u64) -> Result<DecodedInstruction, IsaError> {
    if bytes.len() < 4 {
        return Err(IsaError::Truncated);
    }
    let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

    let top9 = word >> 23;
    if top9 == SOPP_TAG9 {
        let opcode = (word >> 16) & 0x7f;
        let simm16 = (word & 0xffff) as u16;
        return Ok(match opcode {
            SOPP_OP_WAITCNT => {
                let (vmcnt, expcnt, lgkmcnt) = unpack_waitcnt(simm16);
                DecodedInstruction {
                    mnemonic: "s_waitcnt".into(),
                    operands: vec![Operand::WaitCnt {
                        vmcnt: Some(vmcnt),
                        expcnt: Some(expcnt),
                        lgkmcnt: Some(lgkmcnt),
                    }],
                    length: 4,
                }
            }
            SOPP_OP_ENDPGM => DecodedInstruction { mnemonic: "s_endpgm".into(), operands: vec![], length: 4 },
            SOPP_OP_NOP => DecodedInstruction {
                mnemonic: "s_nop".into(),
                operands: vec![Operand::Imm(simm16 as i32)],
                length: 4,
            },
            SOPP_OP_BARRIER => DecodedInstruction { mnemonic: "s_barrier".into(), operands: vec![], length: 4 },
            _ => return Err(IsaError::UnknownEncoding(word)),
        });
    }

    if (word >> 30) == SOP2_TAG {
        let opcode = (word >> 23) & 0x7f;
        let sdst = ((word >> 16) & 0x7f) as u8;
        let ssrc1 = ((word >> 8) & 0xff) as u8;
        let ssrc0 = (word & 0xff) as u8;
        if let Some(def) = SOP2_TABLE.iter().find(|def| def.opcode == opcode) {
            return Ok(DecodedInstruction {
                mnemonic: def.mnemonic.to_owned(),
                operands: vec![Operand::Sgpr(sdst), Operand::Sgpr(ssrc0), Operand::Sgpr(ssrc1)],
                length: 4,
            });
        }
    }

    Err(IsaError::UnknownEncoding(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s_add_u32_matches_scenario_3() {
        let line = ParsedLine {
            mnemonic: "s_add_u32".into(),
            operands: vec![Operand::Sgpr(21), Operand::Sgpr(4), Operand::Sgpr(61)],
        };
        let (bytes, _) = encode(Architecture::Gcn1_0, &line).unwrap();
        assert_eq!(u32::from_le_bytes(bytes.clone().try_into().unwrap()), 0x80153d04);

        let decoded = decode(Architecture::Gcn1_0, &bytes, 0).unwrap();
        assert_eq!(decoded.mnemonic, "s_add_u32");
        assert_eq!(decoded.operands, line.operands);
    }

    #[test]
    fn s_waitcnt_matches_scenario_4() {
        let line = ParsedLine {
            mnemonic: "s_waitcnt".into(),
            operands: vec![Operand::WaitCnt { vmcnt: Some(6), expcnt: Some(3), lgkmcnt: Some(13) }],
        };
        let (bytes, _) = encode(Architecture::Gcn1_2, &line).unwrap();
        assert_eq!(u32::from_le_bytes(bytes.clone().try_into().unwrap()), 0xbf8c0d36);

        let decoded = decode(Architecture::Gcn1_2, &bytes, 0).unwrap();
        assert_eq!(decoded.mnemonic, "s_waitcnt");
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        let line = ParsedLine { mnemonic: "v_not_real".into(), operands: vec![] };
        assert!(matches!(encode(Architecture::Gcn1_0, &line), Err(IsaError::UnknownMnemonic(_))));
    }
}
