//! Shared low-level conventions used across the workspace.

/// Byte order used by every on-disk and wire format in this workspace.
pub type Endian = byteorder::LittleEndian;
