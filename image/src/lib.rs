//! Loader for the bytecode image format: reads a compiled program into
//! memory and carves it into its four fixed regions.

mod error;

pub use error::LoadError;

use byteorder::ReadBytesExt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use util::Endian;

/// A public symbol exported by the program: a name (as an offset into
/// the string table) paired with the code offset its definition starts at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicSymbol {
    pub name_offset: u32,
    pub code_offset: u32,
}

/// An immutable, loaded bytecode program.
///
/// `string_table` and `code` are the raw regions addressed by offsets found
/// in the instruction stream; `globals` is pre-allocated, zeroed storage
/// sized by the header and owned for the lifetime of one interpreter run.
#[derive(Debug, PartialEq)]
pub struct BytecodeImage {
    publics: Vec<PublicSymbol>,
    string_table: Vec<u8>,
    code: Vec<u8>,
    globals_size: u32,
}

impl BytecodeImage {
    pub fn publics(&self) -> &[PublicSymbol] {
        &self.publics
    }

    pub fn string_table(&self) -> &[u8] {
        &self.string_table
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn globals_size(&self) -> u32 {
        self.globals_size
    }

    /// Reads a NUL-terminated string starting at `offset` in the string table.
    pub fn string_at(&self, offset: u32) -> Result<&str, LoadError> {
        let bytes = &self.string_table[offset as usize..];
        let end = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(LoadError::HeaderInvalid("unterminated string table entry"))?;
        std::str::from_utf8(&bytes[..end])
            .map_err(|_| LoadError::HeaderInvalid("string table entry is not valid utf-8"))
    }
}

/// Reads a complete bytecode image from `reader`.
///
/// Layout (all integers little-endian 32-bit words):
/// `stringtab_size | globals_size | n_publics | (name_off, code_off)×n_publics
/// | string_table[stringtab_size] | code[..]`.
pub fn read<R: Read>(reader: &mut R) -> Result<BytecodeImage, LoadError> {
    let stringtab_size = reader.read_u32::<Endian>()?;
    let globals_size = reader.read_u32::<Endian>()?;
    let n_publics = reader.read_u32::<Endian>()?;

    let mut publics = Vec::with_capacity(n_publics as usize);
    for _ in 0..n_publics {
        let name_offset = reader.read_u32::<Endian>()?;
        let code_offset = reader.read_u32::<Endian>()?;
        publics.push(PublicSymbol {
            name_offset,
            code_offset,
        });
    }

    let mut string_table = vec![0u8; stringtab_size as usize];
    reader.read_exact(&mut string_table).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => LoadError::Truncated,
        _ => LoadError::Io(e),
    })?;

    let mut code = Vec::new();
    reader.read_to_end(&mut code)?;

    for public in &publics {
        if public.name_offset as usize >= string_table.len() {
            return Err(LoadError::HeaderInvalid("public symbol name offset out of range"));
        }
        if public.code_offset as usize >= code.len() {
            return Err(LoadError::HeaderInvalid("public symbol code offset out of range"));
        }
    }

    log::debug!(
        "loaded image: stringtab={}B globals={} words publics={} code={}B",
        string_table.len(),
        globals_size,
        publics.len(),
        code.len()
    );

    Ok(BytecodeImage {
        publics,
        string_table,
        code,
        globals_size,
    })
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<BytecodeImage, LoadError> {
    let file = File::open(path)?;
    read(&mut BufReader::new(file))
}

#[cfg(test)]
mod test;
