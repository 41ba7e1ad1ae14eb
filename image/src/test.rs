use super::*;
use byteorder::WriteBytesExt;

fn build(stringtab: &[u8], globals_size: u32, publics: &[(u32, u32)], code: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<Endian>(stringtab.len() as u32).unwrap();
    buf.write_u32::<Endian>(globals_size).unwrap();
    buf.write_u32::<Endian>(publics.len() as u32).unwrap();
    for (name_off, code_off) in publics {
        buf.write_u32::<Endian>(*name_off).unwrap();
        buf.write_u32::<Endian>(*code_off).unwrap();
    }
    buf.extend_from_slice(stringtab);
    buf.extend_from_slice(code);
    buf
}

#[test]
fn reads_minimal_image() {
    let bytes = build(b"main\0", 1, &[(0, 0)], &[0xF0]);
    let image = read(&mut &bytes[..]).unwrap();

    assert_eq!(image.globals_size(), 1);
    assert_eq!(image.code(), &[0xF0]);
    assert_eq!(image.publics().len(), 1);
    assert_eq!(image.string_at(0).unwrap(), "main");
}

#[test]
fn rejects_truncated_string_table() {
    let mut bytes = build(b"main\0", 0, &[], &[0xF0]);
    bytes.truncate(bytes.len() - 6);

    let err = read(&mut &bytes[..]).unwrap_err();
    assert!(matches!(err, LoadError::Truncated));
}

#[test]
fn rejects_out_of_range_public_name_offset() {
    let bytes = build(b"main\0", 0, &[(100, 0)], &[0xF0]);
    let err = read(&mut &bytes[..]).unwrap_err();
    assert!(matches!(err, LoadError::HeaderInvalid(_)));
}

#[test]
fn rejects_out_of_range_public_code_offset() {
    let bytes = build(b"main\0", 0, &[(0, 100)], &[0xF0]);
    let err = read(&mut &bytes[..]).unwrap_err();
    assert!(matches!(err, LoadError::HeaderInvalid(_)));
}
