use crate::error::{Error, Result};
use crate::reader::Reader;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CpInfo {
    /// Slot 0 and the second slot of `Long`/`Double` entries.
    Unusable,
    Utf8(String),
    Class { name_index: u16 },
    Other(&'static str),
}

impl CpInfo {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            CpInfo::Unusable => "Unusable",
            CpInfo::Utf8(_) => "Utf8",
            CpInfo::Class { .. } => "Class",
            CpInfo::Other(kind) => kind,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConstantPool {
    entries: Vec<CpInfo>,
}

impl ConstantPool {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count.max(1));
        entries.push(CpInfo::Unusable);

        while entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let len = reader.read_u2()? as usize;
                    CpInfo::Utf8(decode_modified_utf8(reader.read_bytes(len)?)?)
                }
                3 => {
                    reader.skip(4)?;
                    CpInfo::Other("Integer")
                }
                4 => {
                    reader.skip(4)?;
                    CpInfo::Other("Float")
                }
                5 | 6 => {
                    reader.skip(8)?;
                    entries.push(CpInfo::Other(if tag == 5 { "Long" } else { "Double" }));
                    CpInfo::Unusable
                }
                7 => CpInfo::Class {
                    name_index: reader.read_u2()?,
                },
                8 => {
                    reader.skip(2)?;
                    CpInfo::Other("String")
                }
                9 => {
                    reader.skip(4)?;
                    CpInfo::Other("Fieldref")
                }
                10 => {
                    reader.skip(4)?;
                    CpInfo::Other("Methodref")
                }
                11 => {
                    reader.skip(4)?;
                    CpInfo::Other("InterfaceMethodref")
                }
                12 => {
                    reader.skip(4)?;
                    CpInfo::Other("NameAndType")
                }
                15 => {
                    reader.skip(3)?;
                    CpInfo::Other("MethodHandle")
                }
                16 => {
                    reader.skip(2)?;
                    CpInfo::Other("MethodType")
                }
                17 => {
                    reader.skip(4)?;
                    CpInfo::Other("Dynamic")
                }
                18 => {
                    reader.skip(4)?;
                    CpInfo::Other("InvokeDynamic")
                }
                19 => {
                    reader.skip(2)?;
                    CpInfo::Other("Module")
                }
                20 => {
                    reader.skip(2)?;
                    CpInfo::Other("Package")
                }
                other => return Err(Error::InvalidConstantPoolTag(other)),
            };
            entries.push(entry);
        }

        // A trailing Long/Double may push one slot past the declared count.
        if entries.len() > count {
            return Err(Error::Other("constant pool overflows its declared size"));
        }

        Ok(Self { entries })
    }

    pub(crate) fn get(&self, index: u16) -> Result<&CpInfo> {
        match self.entries.get(index as usize) {
            Some(CpInfo::Unusable) | None => Err(Error::InvalidConstantPoolIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    pub(crate) fn get_utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CpInfo::Utf8(value) => Ok(value),
            other => Err(Error::ConstantPoolTypeMismatch {
                index,
                expected: "Utf8",
                found: other.kind(),
            }),
        }
    }

    pub(crate) fn get_class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            CpInfo::Class { name_index } => Ok(self.get_utf8(*name_index)?.to_string()),
            other => Err(Error::ConstantPoolTypeMismatch {
                index,
                expected: "Class",
                found: other.kind(),
            }),
        }
    }
}

/// Decodes the JVM's "modified UTF-8" (`\0` as two bytes, supplementary
/// characters as surrogate pairs of three-byte sequences).
fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        if b0 & 0x80 == 0 {
            if b0 == 0 {
                return Err(Error::InvalidModifiedUtf8);
            }
            units.push(b0);
            i += 1;
        } else if b0 & 0xe0 == 0xc0 {
            let b1 = continuation(bytes, i + 1)?;
            units.push(((b0 & 0x1f) << 6) | b1);
            i += 2;
        } else if b0 & 0xf0 == 0xe0 {
            let b1 = continuation(bytes, i + 1)?;
            let b2 = continuation(bytes, i + 2)?;
            units.push(((b0 & 0x0f) << 12) | (b1 << 6) | b2);
            i += 3;
        } else {
            return Err(Error::InvalidModifiedUtf8);
        }
    }
    String::from_utf16(&units).map_err(|_| Error::InvalidModifiedUtf8)
}

fn continuation(bytes: &[u8], at: usize) -> Result<u16> {
    match bytes.get(at) {
        Some(b) if b & 0xc0 == 0x80 => Ok((b & 0x3f) as u16),
        _ => Err(Error::InvalidModifiedUtf8),
    }
}
