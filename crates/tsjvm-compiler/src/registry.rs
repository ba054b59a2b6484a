//! Type registries.
//!
//! Populated by the declaration/import resolution that runs before lowering.
//! `JavaTypeRegistry` describes externally-registered host types and is
//! loadable from a JSON manifest; `UserClassRegistry` describes classes the
//! compilation unit itself defines; `FunctionalInterfaceRegistry` tracks
//! single-abstract-method interfaces, both pre-registered and synthesized;
//! `ArtifactMap` accumulates synthesized class bytes across the compilation.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use tsjvm_classfile::descriptor;

/// One method of an externally-registered host type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MethodEntry {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_varargs: bool,
    /// Fluent methods that return the receiver; declared return type may be
    /// a supertype, so call sites cast the result back to the receiver type.
    #[serde(default)]
    pub returns_receiver: bool,
}

/// An externally-registered host type, keyed by source-visible alias.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JavaType {
    pub alias: String,
    pub internal_name: String,
    #[serde(default)]
    pub is_interface: bool,
    #[serde(default)]
    pub methods: Vec<MethodEntry>,
}

#[derive(Debug, Default)]
pub struct JavaTypeRegistry {
    types: Vec<JavaType>,
    by_alias: FxHashMap<String, usize>,
    by_internal: FxHashMap<String, usize>,
}

impl JavaTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a registry from a JSON manifest: an array of type entries.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let types: Vec<JavaType> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for ty in types {
            registry.register(ty);
        }
        Ok(registry)
    }

    pub fn register(&mut self, ty: JavaType) {
        let index = self.types.len();
        self.by_alias.insert(ty.alias.clone(), index);
        self.by_internal.insert(ty.internal_name.clone(), index);
        self.types.push(ty);
    }

    pub fn by_alias(&self, alias: &str) -> Option<&JavaType> {
        self.by_alias.get(alias).map(|&i| &self.types[i])
    }

    pub fn by_internal_name(&self, internal_name: &str) -> Option<&JavaType> {
        self.by_internal.get(internal_name).map(|&i| &self.types[i])
    }

    /// First registered overload of `name` compatible with the argument
    /// descriptors, honoring widening, boxing, and varargs tails.
    pub fn find_method<'a>(
        &self,
        ty: &'a JavaType,
        name: &str,
        arg_descs: &[String],
    ) -> Option<&'a MethodEntry> {
        ty.methods
            .iter()
            .filter(|m| m.name == name)
            .find(|m| method_accepts(m, arg_descs))
    }
}

/// Argument-compatibility check used for overload selection.
fn method_accepts(method: &MethodEntry, arg_descs: &[String]) -> bool {
    let Ok((params, _)) = descriptor::parse_method_descriptor(&method.descriptor) else {
        return false;
    };
    if method.is_varargs {
        let fixed = params.len().saturating_sub(1);
        if arg_descs.len() < fixed {
            return false;
        }
        if !params[..fixed]
            .iter()
            .zip(arg_descs)
            .all(|(p, a)| arg_convertible(a, p))
        {
            return false;
        }
        let rest = &params[fixed];
        // exact array pass-through or element-wise packing
        if arg_descs.len() == params.len() && arg_convertible(&arg_descs[fixed], rest) {
            return true;
        }
        let Some(element) = descriptor::element_type(rest) else {
            return false;
        };
        return arg_descs[fixed..].iter().all(|a| arg_convertible(a, element));
    }
    if arg_descs.len() > params.len() {
        return false;
    }
    // trailing parameters beyond the supplied count are defaulted
    arg_descs
        .iter()
        .zip(&params)
        .all(|(a, p)| arg_convertible(a, p))
}

/// True when an argument of type `from` can be passed where `to` is declared:
/// identity, numeric widening, boxing either way, or reference erasure.
pub fn arg_convertible(from: &str, to: &str) -> bool {
    if from == to || to == descriptor::OBJECT {
        return true;
    }
    if descriptor::is_primitive(from) && descriptor::is_primitive(to) {
        return descriptor::widens_to(from, to);
    }
    if descriptor::is_primitive(from) {
        return descriptor::wrapper_of(from) == Some(to);
    }
    if descriptor::is_primitive(to) {
        return descriptor::primitive_of(from) == Some(to);
    }
    descriptor::is_reference(from) && descriptor::is_reference(to)
}

/// One method of a user-defined class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMethod {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    pub is_private: bool,
}

/// A class defined by the compilation unit itself.
#[derive(Debug, Clone, Default)]
pub struct UserClass {
    pub internal_name: String,
    pub super_class: Option<String>,
    pub methods: Vec<UserMethod>,
    pub fields: FxHashMap<String, String>,
}

impl UserClass {
    pub fn new(internal_name: &str) -> Self {
        Self {
            internal_name: internal_name.to_string(),
            ..Self::default()
        }
    }

    pub fn method(&self, name: &str) -> Option<&UserMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Default)]
pub struct UserClassRegistry {
    classes: FxHashMap<String, UserClass>,
}

impl UserClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: UserClass) {
        self.classes.insert(class.internal_name.clone(), class);
    }

    pub fn get(&self, internal_name: &str) -> Option<&UserClass> {
        self.classes.get(internal_name)
    }

    /// Superclass of a registered class, defaulting to the platform root.
    pub fn super_class_of(&self, internal_name: &str) -> &str {
        self.get(internal_name)
            .and_then(|c| c.super_class.as_deref())
            .unwrap_or(descriptor::OBJECT_INTERNAL)
    }

    /// Looks up a superclass member by fully-qualified name first, then by
    /// simple name.
    pub fn super_member(&self, super_class: &str, name: &str) -> Option<&UserMethod> {
        let class = self.get(super_class)?;
        let qualified = format!("{super_class}.{name}");
        class
            .methods
            .iter()
            .find(|m| m.name == qualified)
            .or_else(|| class.method(name))
    }
}

/// A registered single-abstract-method interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamEntry {
    pub method_name: String,
    pub descriptor: String,
}

#[derive(Debug, Default)]
pub struct FunctionalInterfaceRegistry {
    interfaces: FxHashMap<String, SamEntry>,
}

impl FunctionalInterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, internal_name: &str, entry: SamEntry) {
        self.interfaces.insert(internal_name.to_string(), entry);
    }

    pub fn get(&self, internal_name: &str) -> Option<&SamEntry> {
        self.interfaces.get(internal_name)
    }
}

/// Concurrency-safe accumulation of synthesized class bytes, keyed by
/// internal name. Names never collide because each context numbers its own
/// artifacts.
#[derive(Debug, Default)]
pub struct ArtifactMap {
    inner: Mutex<FxHashMap<String, Vec<u8>>>,
}

impl ArtifactMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, internal_name: &str, bytes: Vec<u8>) {
        self.inner.lock().insert(internal_name.to_string(), bytes);
    }

    pub fn get(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.inner.lock().get(internal_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math_type() -> JavaType {
        JavaType {
            alias: "Math".to_string(),
            internal_name: "java/lang/Math".to_string(),
            is_interface: false,
            methods: vec![
                MethodEntry {
                    name: "abs".to_string(),
                    descriptor: "(I)I".to_string(),
                    is_static: true,
                    is_varargs: false,
                    returns_receiver: false,
                },
                MethodEntry {
                    name: "abs".to_string(),
                    descriptor: "(D)D".to_string(),
                    is_static: true,
                    is_varargs: false,
                    returns_receiver: false,
                },
            ],
        }
    }

    #[test]
    fn test_overload_selection_prefers_first_compatible() {
        let mut registry = JavaTypeRegistry::new();
        registry.register(math_type());
        let ty = registry.by_alias("Math").unwrap();
        let m = registry.find_method(ty, "abs", &["I".to_string()]).unwrap();
        assert_eq!(m.descriptor, "(I)I");
        // a float argument widens only to the double overload
        let m = registry.find_method(ty, "abs", &["F".to_string()]).unwrap();
        assert_eq!(m.descriptor, "(D)D");
    }

    #[test]
    fn test_varargs_compat() {
        let method = MethodEntry {
            name: "format".to_string(),
            descriptor: "(Ljava/lang/String;[Ljava/lang/Object;)Ljava/lang/String;".to_string(),
            is_static: true,
            is_varargs: true,
            returns_receiver: false,
        };
        let s = "Ljava/lang/String;".to_string();
        assert!(method_accepts(&method, &[s.clone()]));
        assert!(method_accepts(&method, &[s.clone(), "I".to_string(), s.clone()]));
        assert!(method_accepts(
            &method,
            &[s.clone(), "[Ljava/lang/Object;".to_string()]
        ));
        assert!(!method_accepts(&method, &[]));
    }

    #[test]
    fn test_from_json() {
        let json = r#"[{
            "alias": "Math",
            "internal_name": "java/lang/Math",
            "methods": [
                {"name": "abs", "descriptor": "(I)I", "is_static": true}
            ]
        }]"#;
        let registry = JavaTypeRegistry::from_json(json).unwrap();
        let ty = registry.by_alias("Math").unwrap();
        assert_eq!(ty.internal_name, "java/lang/Math");
        assert!(ty.methods[0].is_static);
        assert!(!ty.methods[0].is_varargs);
        assert!(registry.by_internal_name("java/lang/Math").is_some());
    }

    #[test]
    fn test_super_member_lookup_order() {
        let mut registry = UserClassRegistry::new();
        let mut base = UserClass::new("com/example/Base");
        base.methods.push(UserMethod {
            name: "com/example/Base.greet".to_string(),
            descriptor: "()Ljava/lang/String;".to_string(),
            is_static: false,
            is_private: false,
        });
        base.methods.push(UserMethod {
            name: "greet".to_string(),
            descriptor: "(I)Ljava/lang/String;".to_string(),
            is_static: false,
            is_private: false,
        });
        registry.register(base);
        // fully-qualified wins over simple name
        let m = registry.super_member("com/example/Base", "greet").unwrap();
        assert_eq!(m.descriptor, "()Ljava/lang/String;");
        assert!(registry.super_member("com/example/Base", "missing").is_none());
    }

    #[test]
    fn test_default_superclass_is_platform_root() {
        let registry = UserClassRegistry::new();
        assert_eq!(registry.super_class_of("com/example/X"), "java/lang/Object");
    }

    #[test]
    fn test_artifact_map_accumulates() {
        let map = ArtifactMap::new();
        map.insert("com/example/$Fn0", vec![1, 2]);
        map.insert("com/example/$FnImpl0", vec![3]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("com/example/$Fn0"), Some(vec![1, 2]));
        assert_eq!(
            map.names(),
            vec!["com/example/$Fn0".to_string(), "com/example/$FnImpl0".to_string()]
        );
    }
}
