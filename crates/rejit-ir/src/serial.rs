//! Binary encoding of a [`Module`]: the four magic bytes `RJIT`, a format
//! version byte, then the bincode payload.

use bincode::Options;

use crate::error::IrError;
use crate::module::Module;

const MAGIC: &[u8; 4] = b"RJIT";
pub const FORMAT_VERSION: u8 = 1;

/// Upper bound on the payload size accepted in either direction.
const MAX_PAYLOAD: u64 = 64 * 1024 * 1024;

fn codec() -> impl Options {
    bincode::options()
        .with_limit(MAX_PAYLOAD)
        .reject_trailing_bytes()
}

pub fn to_bytes(module: &Module) -> Result<Vec<u8>, IrError> {
    let payload = codec()
        .serialize(module)
        .map_err(|e| IrError::Encode(e.to_string()))?;
    let mut out = Vec::with_capacity(MAGIC.len() + 1 + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn from_bytes(bytes: &[u8]) -> Result<Module, IrError> {
    let Some(rest) = bytes.strip_prefix(MAGIC.as_slice()) else {
        return Err(IrError::Decode("missing `RJIT` header".into()));
    };
    let Some((&version, payload)) = rest.split_first() else {
        return Err(IrError::Decode("truncated header".into()));
    };
    if version != FORMAT_VERSION {
        return Err(IrError::UnsupportedVersion(version));
    }
    codec()
        .deserialize(payload)
        .map_err(|e| IrError::Decode(e.to_string()))
}

impl Module {
    pub fn to_bytes(&self) -> Result<Vec<u8>, IrError> {
        to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Module, IrError> {
        from_bytes(bytes)
    }
}

/// Whether `bytes` start like an encoded module.
pub fn is_encoded(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_foreign_header() {
        assert!(matches!(from_bytes(b"ELF\x7f"), Err(IrError::Decode(_))));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = to_bytes(&Module::new("m")).expect("encode");
        bytes[4] = FORMAT_VERSION + 1;
        assert!(matches!(
            from_bytes(&bytes),
            Err(IrError::UnsupportedVersion(v)) if v == FORMAT_VERSION + 1
        ));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let mut bytes = to_bytes(&Module::new("m")).expect("encode");
        bytes.push(0xAA);
        assert!(from_bytes(&bytes).is_err());
    }
}
