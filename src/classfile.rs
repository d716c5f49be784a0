//! Pull-style classfile decoder.
//!
//! Only the structural parts of a classfile are decoded: the constant pool,
//! the class header, field descriptors and the `InnerClasses` attribute.
//! Method bodies and debug attributes are skipped by length without being
//! interpreted.

use serde::Serialize;
use thiserror::Error;

const MAGIC: u32 = 0xCAFE_BABE;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELD_REF: u8 = 9;
const TAG_METHOD_REF: u8 = 10;
const TAG_INTERFACE_METHOD_REF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

const INNER_CLASSES: &str = "InnerClasses";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("truncated classfile: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("constant pool index {0} out of range")]
    BadConstantIndex(u16),

    #[error("constant pool entry {index} is not a {expected}")]
    UnexpectedConstant { index: u16, expected: &'static str },

    #[error("unknown constant pool tag {tag} at entry {index}")]
    UnknownConstantTag { index: u16, tag: u8 },
}

type Result<T> = std::result::Result<T, ClassFileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Inheritance,
    InterfaceImplementation,
    InnerClassNesting,
    FieldContainment,
    Unknown,
}

impl RelationshipKind {
    pub fn weight(self) -> f32 {
        match self {
            RelationshipKind::Inheritance => 4.0,
            RelationshipKind::InterfaceImplementation => 3.0,
            RelationshipKind::InnerClassNesting => 2.0,
            RelationshipKind::FieldContainment => 1.0,
            RelationshipKind::Unknown => 0.0,
        }
    }
}

/// One structural link discovered in a classfile, in dotted external names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipFact {
    pub source: String,
    pub target: String,
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InnerClassEntry {
    inner: String,
    outer: Option<String>,
}

/// Structural summary of one decoded classfile. Names are in internal
/// slash-separated form until emitted as facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    field_descriptors: Vec<String>,
    inner_classes: Vec<InnerClassEntry>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);

        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        r.skip(4)?; // minor, major

        let pool = ConstantPool::read(&mut r)?;

        r.skip(2)?; // access flags
        let name = pool.class_name(r.u16()?)?.to_string();
        let super_index = r.u16()?;
        let super_name = if super_index == 0 {
            None
        } else {
            Some(pool.class_name(super_index)?.to_string())
        };

        let interface_count = r.u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(pool.class_name(r.u16()?)?.to_string());
        }

        let field_count = r.u16()?;
        let mut field_descriptors = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            r.skip(4)?; // access flags, name
            field_descriptors.push(pool.utf8(r.u16()?)?.to_string());
            skip_attributes(&mut r)?;
        }

        let method_count = r.u16()?;
        for _ in 0..method_count {
            r.skip(6)?;
            skip_attributes(&mut r)?;
        }

        let mut inner_classes = Vec::new();
        let attribute_count = r.u16()?;
        for _ in 0..attribute_count {
            let attr_name = pool.utf8(r.u16()?)?;
            let len = r.u32()? as usize;
            if attr_name != INNER_CLASSES {
                r.skip(len)?;
                continue;
            }

            let mut body = Reader::new(r.take(len)?);
            let entries = body.u16()?;
            for _ in 0..entries {
                let inner_index = body.u16()?;
                let outer_index = body.u16()?;
                body.skip(4)?; // simple name, access flags
                if inner_index == 0 {
                    continue;
                }
                let outer = match outer_index {
                    0 => None,
                    idx => Some(pool.class_name(idx)?.to_string()),
                };
                inner_classes.push(InnerClassEntry {
                    inner: pool.class_name(inner_index)?.to_string(),
                    outer,
                });
            }
        }

        Ok(Self {
            name,
            super_name,
            interfaces,
            field_descriptors,
            inner_classes,
        })
    }

    /// Dotted external name of the class itself.
    pub fn external_name(&self) -> String {
        internal_to_external(&self.name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = RelationshipFact> + '_ {
        let source = self.external_name();

        let inheritance = self
            .super_name
            .iter()
            .map(|s| (internal_to_external(s), RelationshipKind::Inheritance));
        let interfaces = self.interfaces.iter().map(|i| {
            (
                internal_to_external(i),
                RelationshipKind::InterfaceImplementation,
            )
        });
        let fields = self
            .field_descriptors
            .iter()
            .filter_map(|d| referenced_class(d))
            .map(|c| (internal_to_external(c), RelationshipKind::FieldContainment));

        let declared =
            inheritance
                .chain(interfaces)
                .chain(fields)
                .map(move |(target, kind)| RelationshipFact {
                    source: source.clone(),
                    target,
                    kind,
                });

        let nested = self.inner_classes.iter().filter_map(|entry| {
            let outer = entry.outer.as_deref()?;
            Some(RelationshipFact {
                source: internal_to_external(outer),
                target: internal_to_external(&entry.inner),
                kind: RelationshipKind::InnerClassNesting,
            })
        });

        declared.chain(nested)
    }
}

/// Decodes a classfile and collects its relationship facts.
pub fn extract_relationships(bytes: &[u8]) -> Result<Vec<RelationshipFact>> {
    let class = ClassFile::parse(bytes)?;
    Ok(class.relationships().collect())
}

pub fn internal_to_external(name: &str) -> String {
    name.replace('/', ".")
}

/// Class named by a field descriptor, with array dimensions stripped.
/// Primitive and primitive-array descriptors yield `None`.
fn referenced_class(descriptor: &str) -> Option<&str> {
    let element = descriptor.trim_start_matches('[');
    element.strip_prefix('L')?.strip_suffix(';')
}

fn skip_attributes(r: &mut Reader<'_>) -> Result<()> {
    let count = r.u16()?;
    for _ in 0..count {
        r.skip(2)?;
        let len = r.u32()? as usize;
        r.skip(len)?;
    }
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ClassFileError::Truncated {
                offset: self.pos,
                needed: n,
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class(u16),
    Other,
    // Second slot of a Long or Double.
    Unusable,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn read(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(count as usize);
        // Index 0 is never valid.
        entries.push(Constant::Unusable);

        let mut index = 1u16;
        while index < count {
            let tag = r.u8()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let len = r.u16()? as usize;
                    Constant::Utf8(decode_modified_utf8(r.take(len)?))
                }
                TAG_CLASS => Constant::Class(r.u16()?),
                TAG_STRING | TAG_METHOD_TYPE | TAG_MODULE | TAG_PACKAGE => {
                    r.skip(2)?;
                    Constant::Other
                }
                TAG_METHOD_HANDLE => {
                    r.skip(3)?;
                    Constant::Other
                }
                TAG_INTEGER
                | TAG_FLOAT
                | TAG_FIELD_REF
                | TAG_METHOD_REF
                | TAG_INTERFACE_METHOD_REF
                | TAG_NAME_AND_TYPE
                | TAG_DYNAMIC
                | TAG_INVOKE_DYNAMIC => {
                    r.skip(4)?;
                    Constant::Other
                }
                TAG_LONG | TAG_DOUBLE => {
                    // The second slot must also fit in the pool.
                    if index + 1 >= count {
                        return Err(ClassFileError::BadConstantIndex(index));
                    }
                    r.skip(8)?;
                    entries.push(Constant::Other);
                    index += 1;
                    Constant::Unusable
                }
                tag => return Err(ClassFileError::UnknownConstantTag { index, tag }),
            };
            entries.push(constant);
            index += 1;
        }

        Ok(Self { entries })
    }

    fn get(&self, index: u16) -> Result<&Constant> {
        self.entries
            .get(index as usize)
            .filter(|c| !matches!(c, Constant::Unusable))
            .ok_or(ClassFileError::BadConstantIndex(index))
    }

    fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s),
            _ => Err(ClassFileError::UnexpectedConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class(name_index) => self.utf8(*name_index),
            _ => Err(ClassFileError::UnexpectedConstant {
                index,
                expected: "Class",
            }),
        }
    }
}

/// Decodes the JVM's modified UTF-8. Each 1-3 byte group encodes one UTF-16
/// code unit, so supplementary characters arrive as surrogate pairs.
fn decode_modified_utf8(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i] as u16;
        if b & 0x80 == 0 {
            units.push(b);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            units.push(((b & 0x1F) << 6) | (bytes[i + 1] as u16 & 0x3F));
            i += 2;
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            units.push(
                ((b & 0x0F) << 12)
                    | ((bytes[i + 1] as u16 & 0x3F) << 6)
                    | (bytes[i + 2] as u16 & 0x3F),
            );
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}
