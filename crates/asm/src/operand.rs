//! Parses an instruction's operand list into the operand vocabulary
//! `clrx-isa`'s encoder understands. This is distinct from the `.4.4`
//! expression engine: register syntax (`sN`/`vN`) and `s_waitcnt`'s
//! `vmcnt()/expcnt()/lgkmcnt()` keyword syntax only make sense as
//! instruction operands, never as ordinary pseudo-op arguments.

use clrx_gpu::numstr;
use clrx_isa::Operand;

use crate::error::Error;

/// Parse the comma-separated operand list following `mnemonic`.
pub fn parse_operands(mnemonic: &str, args: &str) -> Result<Vec<Operand>, Error> {
    let args = args.trim();
    if mnemonic == "s_waitcnt" {
        return Ok(vec![parse_waitcnt(args)?]);
    }
    if args.is_empty() {
        return Ok(Vec::new());
    }
    args.split(',').map(|part| parse_operand(part.trim())).collect()
}

fn parse_operand(text: &str) -> Result<Operand, Error> {
    if let Some(register) = parse_register(text, 's').or_else(|| parse_register(text, 'S')) {
        return Ok(Operand::Sgpr(register));
    }
    if let Some(register) = parse_register(text, 'v').or_else(|| parse_register(text, 'V')) {
        return Ok(Operand::Vgpr(register));
    }
    let value = numstr::parse_i64_ranged(text, i32::MIN as i64, i32::MAX as i64)
        .map_err(|error| Error::Lex(format!("bad immediate `{text}`: {error}")))?;
    Ok(Operand::Imm(value as i32))
}

fn parse_register(text: &str, prefix: char) -> Option<u8> {
    let rest = text.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

fn parse_waitcnt(args: &str) -> Result<Operand, Error> {
    let mut vmcnt = None;
    let mut expcnt = None;
    let mut lgkmcnt = None;

    for part in args.split_whitespace() {
        let (name, value) =
            split_call(part).ok_or_else(|| Error::Lex(format!("malformed `s_waitcnt` operand `{part}`")))?;
        let value = numstr::parse_u64_ranged(value, u32::MAX as u64)
            .map_err(|error| Error::Lex(format!("bad wait count `{value}`: {error}")))? as u32;
        match name {
            "vmcnt" => vmcnt = Some(value),
            "expcnt" => expcnt = Some(value),
            "lgkmcnt" => lgkmcnt = Some(value),
            other => return Err(Error::Lex(format!("unknown `s_waitcnt` field `{other}`"))),
        }
    }

    Ok(Operand::WaitCnt { vmcnt, expcnt, lgkmcnt })
}

fn split_call(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let close = text.rfind(')')?;
    (close > open).then(|| (&text[..open], &text[open + 1..close]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register_and_immediate_operands() {
        let operands = parse_operands("s_add_u32", "s1, s2, 7").unwrap();
        assert_eq!(operands, vec![Operand::Sgpr(1), Operand::Sgpr(2), Operand::Imm(7)]);
    }

    #[test]
    fn parses_vector_registers() {
        let operands = parse_operands("v_mov_b32", "v0, v1").unwrap();
        assert_eq!(operands, vec![Operand::Vgpr(0), Operand::Vgpr(1)]);
    }

    #[test]
    fn parses_waitcnt_fields() {
        let operands = parse_operands("s_waitcnt", "vmcnt(0) lgkmcnt(1)").unwrap();
        assert_eq!(operands, vec![Operand::WaitCnt { vmcnt: Some(0), expcnt: None, lgkmcnt: Some(1) }]);
    }

    #[test]
    fn rejects_unknown_waitcnt_field() {
        assert!(parse_operands("s_waitcnt", "bogus(0)").is_err());
    }
}
