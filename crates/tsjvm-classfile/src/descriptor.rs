//! Descriptor algebra.
//!
//! Pure functions over JVM type descriptors: a single letter for primitives,
//! `L<internal-name>;` for reference types, one `[` prefix per array
//! dimension. These are the bridge between the loosely-typed source surface
//! and the JVM's statically-typed calling convention; every argument-passing
//! and return-value boundary in the compiler consults them.

use crate::DescriptorError;

/// Descriptor for `java/lang/Object`.
pub const OBJECT: &str = "Ljava/lang/Object;";
/// Descriptor for `java/lang/String`.
pub const STRING: &str = "Ljava/lang/String;";
/// Descriptor for `java/util/ArrayList`.
pub const ARRAY_LIST: &str = "Ljava/util/ArrayList;";
/// Descriptor for an erased reference array.
pub const OBJECT_ARRAY: &str = "[Ljava/lang/Object;";

/// Internal name of the platform root type.
pub const OBJECT_INTERNAL: &str = "java/lang/Object";

/// Returns true for the eight single-letter primitive descriptors.
pub fn is_primitive(desc: &str) -> bool {
    matches!(desc, "Z" | "B" | "C" | "S" | "I" | "J" | "F" | "D")
}

/// Returns true for reference descriptors (`L...;` or arrays).
pub fn is_reference(desc: &str) -> bool {
    desc.starts_with('L') || desc.starts_with('[')
}

/// Returns true for array descriptors.
pub fn is_array(desc: &str) -> bool {
    desc.starts_with('[')
}

/// Returns true for the two wide primitives that occupy two local slots.
pub fn is_wide(desc: &str) -> bool {
    matches!(desc, "J" | "D")
}

/// Local-slot width of a value of this type: 2 for `J`/`D`, 1 otherwise.
pub fn slot_width(desc: &str) -> u16 {
    if is_wide(desc) {
        2
    } else {
        1
    }
}

/// Returns true if the descriptor is `V` (void).
pub fn is_void(desc: &str) -> bool {
    desc == "V"
}

/// The boxed wrapper descriptor for a primitive descriptor.
pub fn wrapper_of(primitive: &str) -> Option<&'static str> {
    Some(match primitive {
        "Z" => "Ljava/lang/Boolean;",
        "B" => "Ljava/lang/Byte;",
        "C" => "Ljava/lang/Character;",
        "S" => "Ljava/lang/Short;",
        "I" => "Ljava/lang/Integer;",
        "J" => "Ljava/lang/Long;",
        "F" => "Ljava/lang/Float;",
        "D" => "Ljava/lang/Double;",
        _ => return None,
    })
}

/// The primitive descriptor a wrapper descriptor unboxes to.
pub fn primitive_of(wrapper: &str) -> Option<&'static str> {
    Some(match wrapper {
        "Ljava/lang/Boolean;" => "Z",
        "Ljava/lang/Byte;" => "B",
        "Ljava/lang/Character;" => "C",
        "Ljava/lang/Short;" => "S",
        "Ljava/lang/Integer;" => "I",
        "Ljava/lang/Long;" => "J",
        "Ljava/lang/Float;" => "F",
        "Ljava/lang/Double;" => "D",
        _ => return None,
    })
}

/// Numeric widening table: true when `from` widens implicitly to `to`
/// without a source-visible conversion (used when matching a closure body
/// against a primitive functional-interface specialization).
pub fn widens_to(from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    match from {
        "B" => matches!(to, "S" | "I" | "J" | "F" | "D"),
        "S" | "C" => matches!(to, "I" | "J" | "F" | "D"),
        "I" => matches!(to, "J" | "F" | "D"),
        "J" => matches!(to, "F" | "D"),
        "F" => to == "D",
        _ => false,
    }
}

/// Element type of an array descriptor (strips exactly one `[`).
pub fn element_type(array_desc: &str) -> Option<&str> {
    array_desc.strip_prefix('[')
}

/// Builds an array descriptor with one more dimension.
pub fn array_of(element_desc: &str) -> String {
    format!("[{element_desc}")
}

/// Converts an internal class name into a reference descriptor.
pub fn descriptor_from_internal(internal_name: &str) -> String {
    if internal_name.starts_with('[') {
        // Array "class names" are already descriptors.
        internal_name.to_string()
    } else {
        format!("L{internal_name};")
    }
}

/// Extracts the internal class name from a reference descriptor.
/// Array descriptors are their own internal name.
pub fn internal_name(desc: &str) -> Option<&str> {
    if desc.starts_with('[') {
        Some(desc)
    } else {
        desc.strip_prefix('L')?.strip_suffix(';')
    }
}

/// Builds a method descriptor from parameter and return descriptors.
pub fn method_descriptor<'a, I>(params: I, return_desc: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::from("(");
    for p in params {
        out.push_str(p);
    }
    out.push(')');
    out.push_str(return_desc);
    out
}

/// Parses a method descriptor into its parameter descriptors and return
/// descriptor.
pub fn parse_method_descriptor(desc: &str) -> Result<(Vec<String>, String), DescriptorError> {
    let malformed = || DescriptorError::Malformed(desc.to_string());
    let inner = desc.strip_prefix('(').ok_or_else(malformed)?;
    let close = inner.find(')').ok_or_else(malformed)?;
    let (params_str, rest) = inner.split_at(close);
    let return_desc = &rest[1..];
    if return_desc.is_empty() {
        return Err(malformed());
    }

    let mut params = Vec::new();
    let bytes = params_str.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while bytes[i] == b'[' {
            i += 1;
            if i >= bytes.len() {
                return Err(malformed());
            }
        }
        match bytes[i] {
            b'L' => {
                let semi = params_str[i..].find(';').ok_or_else(malformed)?;
                i += semi + 1;
            }
            b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D' => i += 1,
            _ => return Err(malformed()),
        }
        params.push(params_str[start..i].to_string());
    }
    Ok((params, return_desc.to_string()))
}

/// Total argument slot count of a method descriptor, including the receiver
/// slot when `with_receiver` is set. This is the trailing operand of the
/// interface-dispatch instruction.
pub fn argument_slots(desc: &str, with_receiver: bool) -> Result<u8, DescriptorError> {
    let (params, _) = parse_method_descriptor(desc)?;
    let mut slots: u16 = if with_receiver { 1 } else { 0 };
    for p in &params {
        slots += slot_width(p);
    }
    Ok(slots as u8)
}

/// Human-readable type name for error messages: `[I` becomes `int[]`,
/// `Ljava/lang/String;` becomes `String`.
pub fn display_name(desc: &str) -> String {
    let mut dims = 0;
    let mut rest = desc;
    while let Some(stripped) = rest.strip_prefix('[') {
        dims += 1;
        rest = stripped;
    }
    let base = match rest {
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "S" => "short".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        "V" => "void".to_string(),
        _ => match internal_name(rest) {
            Some(name) => name.rsplit('/').next().unwrap_or(name).to_string(),
            None => "unknown".to_string(),
        },
    };
    format!("{}{}", base, "[]".repeat(dims))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_classification() {
        for p in ["Z", "B", "C", "S", "I", "J", "F", "D"] {
            assert!(is_primitive(p));
            assert!(!is_reference(p));
        }
        assert!(!is_primitive(OBJECT));
        assert!(is_reference(OBJECT));
        assert!(is_reference("[I"));
    }

    #[test]
    fn test_slot_width() {
        assert_eq!(slot_width("J"), 2);
        assert_eq!(slot_width("D"), 2);
        assert_eq!(slot_width("I"), 1);
        assert_eq!(slot_width(OBJECT), 1);
    }

    #[test]
    fn test_boxing_pairs_round_trip() {
        for p in ["Z", "B", "C", "S", "I", "J", "F", "D"] {
            let wrapper = wrapper_of(p).unwrap();
            assert_eq!(primitive_of(wrapper), Some(p));
        }
        assert_eq!(wrapper_of("V"), None);
        assert_eq!(primitive_of(STRING), None);
    }

    #[test]
    fn test_widening() {
        assert!(widens_to("I", "J"));
        assert!(widens_to("I", "D"));
        assert!(widens_to("F", "D"));
        assert!(widens_to("B", "I"));
        assert!(!widens_to("J", "I"));
        assert!(!widens_to("D", "F"));
        assert!(widens_to("I", "I"));
    }

    #[test]
    fn test_array_element_typing() {
        assert_eq!(element_type("[I"), Some("I"));
        assert_eq!(element_type("[[I"), Some("[I"));
        assert_eq!(element_type("[Ljava/lang/String;"), Some(STRING));
        assert_eq!(element_type("I"), None);
        assert_eq!(array_of("I"), "[I");
    }

    #[test]
    fn test_internal_name_conversions() {
        assert_eq!(descriptor_from_internal("java/lang/String"), STRING);
        assert_eq!(internal_name(STRING), Some("java/lang/String"));
        assert_eq!(internal_name("[I"), Some("[I"));
        assert_eq!(internal_name("I"), None);
    }

    #[test]
    fn test_method_descriptor_round_trip() {
        let desc = method_descriptor(["I", STRING, "[D"], "V");
        assert_eq!(desc, "(ILjava/lang/String;[D)V");
        let (params, ret) = parse_method_descriptor(&desc).unwrap();
        assert_eq!(params, vec!["I", STRING, "[D"]);
        assert_eq!(ret, "V");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_method_descriptor("I)V").is_err());
        assert!(parse_method_descriptor("(I").is_err());
        assert!(parse_method_descriptor("(Q)V").is_err());
        assert!(parse_method_descriptor("(I)").is_err());
    }

    #[test]
    fn test_argument_slots() {
        assert_eq!(argument_slots("(IJ)V", true).unwrap(), 4);
        assert_eq!(argument_slots("()V", true).unwrap(), 1);
        assert_eq!(argument_slots("(D)D", false).unwrap(), 2);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("[I"), "int[]");
        assert_eq!(display_name("[[Ljava/lang/String;"), "String[][]");
        assert_eq!(display_name("D"), "double");
        assert_eq!(display_name(OBJECT), "Object");
    }
}
