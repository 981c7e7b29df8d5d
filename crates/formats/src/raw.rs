//! The `raw` pseudo-container: just the assembled code bytes, no header at all.
//! Exists so the assembler can target a bare GPU without any driver wrapper
//! (spec.md §8 scenario 1: "Empty source, format=raw... → minimal raw container
//! of zero code bytes").

/// The `raw` model is the code bytes themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawModel {
    pub code: Vec<u8>,
}

/// Parsing `raw` never fails: any byte sequence is valid code.
pub fn parse(bytes: &[u8]) -> RawModel {
    RawModel { code: bytes.to_vec() }
}

/// Emitting `raw` is the identity function over the code bytes.
pub fn emit(model: &RawModel) -> Vec<u8> {
    model.code.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_produces_zero_bytes() {
        let model = RawModel::default();
        assert_eq!(emit(&model), Vec::<u8>::new());
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let bytes = vec![0x01, 0x02, 0x03, 0x04];
        let model = parse(&bytes);
        assert_eq!(emit(&model), bytes);
    }
}
