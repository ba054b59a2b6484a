//! Deduplicating constant pool.
//!
//! Every `add_*` call is content-addressed: requesting the same logical entry
//! twice yields the same pool index, so the pool never grows on a repeated
//! entry. Long and Double constants occupy two slots per the class file
//! format. The pool lives as long as the class being built and is cleared
//! only by starting a new [`crate::ClassWriter`].

use rustc_hash::FxHashMap;

/// Constant pool entry tags as written to the class file.
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { utf8_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    /// Second slot of a Long/Double entry.
    Reserved,
}

/// Tag of a constant for stack-map verification purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantTag {
    Integer,
    Float,
    Long,
    Double,
    String,
    Class,
    Other,
}

/// The constant pool of a class under construction.
#[derive(Debug, Default)]
pub struct ConstantPool {
    // Index 0 is reserved by the format; entries[0] is a placeholder.
    entries: Vec<Entry>,
    utf8_cache: FxHashMap<String, u16>,
    class_cache: FxHashMap<String, u16>,
    string_cache: FxHashMap<String, u16>,
    integer_cache: FxHashMap<i32, u16>,
    long_cache: FxHashMap<i64, u16>,
    float_cache: FxHashMap<u32, u16>,
    double_cache: FxHashMap<u64, u16>,
    name_and_type_cache: FxHashMap<(u16, u16), u16>,
    member_ref_cache: FxHashMap<(u8, u16, u16), u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Entry::Reserved],
            ..Self::default()
        }
    }

    /// Number of pool slots, including the reserved index 0.
    pub fn len(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    fn push(&mut self, entry: Entry) -> u16 {
        let index = self.entries.len() as u16;
        self.entries.push(entry);
        index
    }

    /// Interns a UTF8 string.
    pub fn add_utf8(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.utf8_cache.get(value) {
            return index;
        }
        let index = self.push(Entry::Utf8(value.to_string()));
        self.utf8_cache.insert(value.to_string(), index);
        index
    }

    /// Interns a class reference by internal name.
    pub fn add_class(&mut self, internal_name: &str) -> u16 {
        if let Some(&index) = self.class_cache.get(internal_name) {
            return index;
        }
        let name_index = self.add_utf8(internal_name);
        let index = self.push(Entry::Class { name_index });
        self.class_cache.insert(internal_name.to_string(), index);
        index
    }

    /// Interns a string literal.
    pub fn add_string(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.string_cache.get(value) {
            return index;
        }
        let utf8_index = self.add_utf8(value);
        let index = self.push(Entry::String { utf8_index });
        self.string_cache.insert(value.to_string(), index);
        index
    }

    /// Interns an integer literal.
    pub fn add_integer(&mut self, value: i32) -> u16 {
        if let Some(&index) = self.integer_cache.get(&value) {
            return index;
        }
        let index = self.push(Entry::Integer(value));
        self.integer_cache.insert(value, index);
        index
    }

    /// Interns a long literal. Occupies two pool slots.
    pub fn add_long(&mut self, value: i64) -> u16 {
        if let Some(&index) = self.long_cache.get(&value) {
            return index;
        }
        let index = self.push(Entry::Long(value));
        self.entries.push(Entry::Reserved);
        self.long_cache.insert(value, index);
        index
    }

    /// Interns a float literal, keyed by bit pattern.
    pub fn add_float(&mut self, value: f32) -> u16 {
        let bits = value.to_bits();
        if let Some(&index) = self.float_cache.get(&bits) {
            return index;
        }
        let index = self.push(Entry::Float(value));
        self.float_cache.insert(bits, index);
        index
    }

    /// Interns a double literal, keyed by bit pattern. Occupies two slots.
    pub fn add_double(&mut self, value: f64) -> u16 {
        let bits = value.to_bits();
        if let Some(&index) = self.double_cache.get(&bits) {
            return index;
        }
        let index = self.push(Entry::Double(value));
        self.entries.push(Entry::Reserved);
        self.double_cache.insert(bits, index);
        index
    }

    /// Interns a NameAndType entry.
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        if let Some(&index) = self.name_and_type_cache.get(&(name_index, descriptor_index)) {
            return index;
        }
        let index = self.push(Entry::NameAndType { name_index, descriptor_index });
        self.name_and_type_cache.insert((name_index, descriptor_index), index);
        index
    }

    /// Interns a field reference.
    pub fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.add_member_ref(9, class, name, descriptor)
    }

    /// Interns a plain method reference.
    pub fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.add_member_ref(10, class, name, descriptor)
    }

    /// Interns an interface method reference.
    pub fn add_interface_method_ref(&mut self, interface: &str, name: &str, descriptor: &str) -> u16 {
        self.add_member_ref(11, interface, name, descriptor)
    }

    fn add_member_ref(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type_index = self.add_name_and_type(name, descriptor);
        let key = (tag, class_index, name_and_type_index);
        if let Some(&index) = self.member_ref_cache.get(&key) {
            return index;
        }
        let entry = match tag {
            9 => Entry::FieldRef { class_index, name_and_type_index },
            10 => Entry::MethodRef { class_index, name_and_type_index },
            _ => Entry::InterfaceMethodRef { class_index, name_and_type_index },
        };
        let index = self.push(entry);
        self.member_ref_cache.insert(key, index);
        index
    }

    /// Looks up the internal name behind a Class entry.
    pub fn class_name(&self, index: u16) -> Option<&str> {
        match self.entries.get(index as usize)? {
            Entry::Class { name_index } => self.utf8_at(*name_index),
            _ => None,
        }
    }

    /// Looks up the descriptor behind a method or interface-method reference.
    pub fn method_descriptor(&self, index: u16) -> Option<&str> {
        let nat = match self.entries.get(index as usize)? {
            Entry::MethodRef { name_and_type_index, .. }
            | Entry::InterfaceMethodRef { name_and_type_index, .. } => *name_and_type_index,
            _ => return None,
        };
        self.name_and_type_descriptor(nat)
    }

    /// Looks up the class behind a method or interface-method reference.
    pub fn method_class(&self, index: u16) -> Option<&str> {
        let class = match self.entries.get(index as usize)? {
            Entry::MethodRef { class_index, .. }
            | Entry::InterfaceMethodRef { class_index, .. } => *class_index,
            _ => return None,
        };
        self.class_name(class)
    }

    /// Looks up the name behind a method or interface-method reference.
    pub fn method_name(&self, index: u16) -> Option<&str> {
        let nat = match self.entries.get(index as usize)? {
            Entry::MethodRef { name_and_type_index, .. }
            | Entry::InterfaceMethodRef { name_and_type_index, .. } => *name_and_type_index,
            _ => return None,
        };
        match self.entries.get(nat as usize)? {
            Entry::NameAndType { name_index, .. } => self.utf8_at(*name_index),
            _ => None,
        }
    }

    /// Looks up the descriptor behind a field reference.
    pub fn field_descriptor(&self, index: u16) -> Option<&str> {
        let nat = match self.entries.get(index as usize)? {
            Entry::FieldRef { name_and_type_index, .. } => *name_and_type_index,
            _ => return None,
        };
        self.name_and_type_descriptor(nat)
    }

    /// Tag of the constant at `index`, for `ldc` verification typing.
    pub fn constant_tag(&self, index: u16) -> ConstantTag {
        match self.entries.get(index as usize) {
            Some(Entry::Integer(_)) => ConstantTag::Integer,
            Some(Entry::Float(_)) => ConstantTag::Float,
            Some(Entry::Long(_)) => ConstantTag::Long,
            Some(Entry::Double(_)) => ConstantTag::Double,
            Some(Entry::String { .. }) => ConstantTag::String,
            Some(Entry::Class { .. }) => ConstantTag::Class,
            _ => ConstantTag::Other,
        }
    }

    fn utf8_at(&self, index: u16) -> Option<&str> {
        match self.entries.get(index as usize)? {
            Entry::Utf8(value) => Some(value),
            _ => None,
        }
    }

    fn name_and_type_descriptor(&self, index: u16) -> Option<&str> {
        match self.entries.get(index as usize)? {
            Entry::NameAndType { descriptor_index, .. } => self.utf8_at(*descriptor_index),
            _ => None,
        }
    }

    /// Serializes the pool in class-file order (big-endian).
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in self.entries.iter().skip(1) {
            match entry {
                Entry::Utf8(value) => {
                    let bytes = modified_utf8(value);
                    out.push(1);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(&bytes);
                }
                Entry::Integer(value) => {
                    out.push(3);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Entry::Float(value) => {
                    out.push(4);
                    out.extend_from_slice(&value.to_bits().to_be_bytes());
                }
                Entry::Long(value) => {
                    out.push(5);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Entry::Double(value) => {
                    out.push(6);
                    out.extend_from_slice(&value.to_bits().to_be_bytes());
                }
                Entry::Class { name_index } => {
                    out.push(7);
                    out.extend_from_slice(&name_index.to_be_bytes());
                }
                Entry::String { utf8_index } => {
                    out.push(8);
                    out.extend_from_slice(&utf8_index.to_be_bytes());
                }
                Entry::FieldRef { class_index, name_and_type_index } => {
                    out.push(9);
                    out.extend_from_slice(&class_index.to_be_bytes());
                    out.extend_from_slice(&name_and_type_index.to_be_bytes());
                }
                Entry::MethodRef { class_index, name_and_type_index } => {
                    out.push(10);
                    out.extend_from_slice(&class_index.to_be_bytes());
                    out.extend_from_slice(&name_and_type_index.to_be_bytes());
                }
                Entry::InterfaceMethodRef { class_index, name_and_type_index } => {
                    out.push(11);
                    out.extend_from_slice(&class_index.to_be_bytes());
                    out.extend_from_slice(&name_and_type_index.to_be_bytes());
                }
                Entry::NameAndType { name_index, descriptor_index } => {
                    out.push(12);
                    out.extend_from_slice(&name_index.to_be_bytes());
                    out.extend_from_slice(&descriptor_index.to_be_bytes());
                }
                Entry::Reserved => {}
            }
        }
    }
}

/// Encodes a string in the class-file modified UTF-8 form: U+0000 uses the
/// two-byte encoding and supplementary code points are written as CESU-8
/// surrogate pairs, six bytes each.
fn modified_utf8(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len());
    for ch in value.chars() {
        let code = ch as u32;
        match code {
            0 => bytes.extend_from_slice(&[0xc0, 0x80]),
            0x01..=0x7f => bytes.push(code as u8),
            0x80..=0x7ff => {
                bytes.push(0xc0 | (code >> 6) as u8);
                bytes.push(0x80 | (code & 0x3f) as u8);
            }
            0x800..=0xffff => {
                bytes.push(0xe0 | (code >> 12) as u8);
                bytes.push(0x80 | ((code >> 6) & 0x3f) as u8);
                bytes.push(0x80 | (code & 0x3f) as u8);
            }
            _ => {
                let high = 0xd800 + ((code - 0x1_0000) >> 10);
                let low = 0xdc00 + ((code - 0x1_0000) & 0x3ff);
                for unit in [high, low] {
                    bytes.push(0xe0 | (unit >> 12) as u8);
                    bytes.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                    bytes.push(0x80 | (unit & 0x3f) as u8);
                }
            }
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_dedup() {
        let mut pool = ConstantPool::new();
        let a = pool.add_utf8("hello");
        let b = pool.add_utf8("hello");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_class_dedup() {
        let mut pool = ConstantPool::new();
        let a = pool.add_class("java/lang/Object");
        let len = pool.len();
        let b = pool.add_class("java/lang/Object");
        assert_eq!(a, b);
        assert_eq!(pool.len(), len);
    }

    #[test]
    fn test_method_ref_dedup() {
        let mut pool = ConstantPool::new();
        let a = pool.add_method_ref("java/util/ArrayList", "add", "(Ljava/lang/Object;)Z");
        let len = pool.len();
        let b = pool.add_method_ref("java/util/ArrayList", "add", "(Ljava/lang/Object;)Z");
        assert_eq!(a, b);
        assert_eq!(pool.len(), len);
    }

    #[test]
    fn test_field_and_method_refs_distinct() {
        let mut pool = ConstantPool::new();
        let f = pool.add_field_ref("C", "x", "I");
        let m = pool.add_method_ref("C", "x", "I");
        assert_ne!(f, m);
    }

    #[test]
    fn test_wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        let before = pool.len();
        let l = pool.add_long(42);
        assert_eq!(pool.len(), before + 2);
        assert_eq!(pool.add_long(42), l);
        assert_eq!(pool.len(), before + 2);

        let d = pool.add_double(1.5);
        assert_eq!(pool.constant_tag(d), ConstantTag::Double);
    }

    #[test]
    fn test_float_bit_pattern_keying() {
        let mut pool = ConstantPool::new();
        let a = pool.add_float(1.0);
        let b = pool.add_float(1.0);
        assert_eq!(a, b);
        let c = pool.add_float(-1.0);
        assert_ne!(a, c);
    }

    #[test]
    fn test_reverse_lookups() {
        let mut pool = ConstantPool::new();
        let class = pool.add_class("java/lang/String");
        assert_eq!(pool.class_name(class), Some("java/lang/String"));

        let m = pool.add_method_ref("java/lang/String", "length", "()I");
        assert_eq!(pool.method_descriptor(m), Some("()I"));
        assert_eq!(pool.field_descriptor(m), None);

        let f = pool.add_field_ref("C", "cap$x", "I");
        assert_eq!(pool.field_descriptor(f), Some("I"));
    }

    fn utf8_body(value: &str) -> (u16, Vec<u8>) {
        let mut pool = ConstantPool::new();
        pool.add_utf8(value);
        let mut out = Vec::new();
        pool.write_to(&mut out);
        // count(2) + tag(1) at out[2], then length(2) and body
        assert_eq!(out[2], 1);
        let len = u16::from_be_bytes([out[3], out[4]]);
        (len, out[5..5 + len as usize].to_vec())
    }

    #[test]
    fn test_nul_uses_two_byte_encoding() {
        let (len, body) = utf8_body("a\u{0}b");
        assert_eq!(len, 4);
        assert_eq!(body, vec![0x61, 0xc0, 0x80, 0x62]);
    }

    #[test]
    fn test_supplementary_char_encodes_as_surrogate_pair() {
        // U+1D11E (musical G clef): surrogates D834 DD1E, three bytes each
        let (len, body) = utf8_body("\u{1D11E}");
        assert_eq!(len, 6);
        assert_eq!(body, vec![0xed, 0xa0, 0xb4, 0xed, 0xb4, 0x9e]);
    }

    #[test]
    fn test_bmp_strings_match_standard_utf8() {
        let (len, body) = utf8_body("héllo");
        assert_eq!(len, 6);
        assert_eq!(body, "héllo".as_bytes());
    }

    #[test]
    fn test_serialized_pool_count() {
        let mut pool = ConstantPool::new();
        pool.add_utf8("a");
        pool.add_long(1);
        let mut out = Vec::new();
        pool.write_to(&mut out);
        let count = u16::from_be_bytes([out[0], out[1]]);
        // 1 reserved + 1 utf8 + 2 long slots
        assert_eq!(count, 4);
    }
}
