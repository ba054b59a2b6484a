//! Compilation context.
//!
//! A stack of method scopes, each with its own local-slot table, capture list,
//! and `this` binding. Inference scopes can be pushed independently of slot
//! scopes, which lets return-type inference ask "what type would this
//! expression have if parameter x had type T" before any slot exists. The
//! synthesized-artifact counter lives here too, so concurrent compilations
//! with separate contexts never share numbering state.

use rustc_hash::FxHashMap;

use tsjvm_classfile::descriptor;

/// A named local and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSlot {
    pub slot: u16,
    pub descriptor: String,
}

/// Where a captured value comes from in the enclosing scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// A local slot of the enclosing method.
    Slot(u16),
    /// A capture field of the enclosing closure, read through its `this`.
    OuterField(String),
}

/// One captured variable of the closure currently being compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub name: String,
    pub field_name: String,
    pub descriptor: String,
    pub source: CaptureSource,
}

/// What `this` means in the current scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThisBinding {
    /// Slot 0 of an instance method.
    Receiver { class: String },
    /// The enclosing receiver, captured as a field on a closure implementor.
    CapturedField { field_name: String, descriptor: String },
    /// An instance method of a synthesized class: slot 0 is reserved but the
    /// source-level `this` does not refer to it.
    Synthetic,
    /// Static context; `this` is unavailable and slot 0 is free.
    None,
}

/// Result of name resolution over the scope stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Local(LocalSlot),
    Captured(Capture),
    Unresolved,
}

#[derive(Debug)]
struct MethodScope {
    locals: FxHashMap<String, LocalSlot>,
    captures: Vec<Capture>,
    this_binding: ThisBinding,
    next_slot: u16,
    max_slot: u16,
}

impl MethodScope {
    fn new(this_binding: ThisBinding) -> Self {
        let next_slot = match this_binding {
            ThisBinding::None => 0,
            _ => 1,
        };
        Self {
            locals: FxHashMap::default(),
            captures: Vec::new(),
            this_binding,
            next_slot,
            max_slot: next_slot,
        }
    }
}

#[derive(Debug, Default)]
pub struct CompilationContext {
    scopes: Vec<MethodScope>,
    inference: Vec<FxHashMap<String, String>>,
    class_stack: Vec<String>,
    artifact_counter: u32,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- class stack ----

    pub fn push_class(&mut self, internal_name: &str) {
        self.class_stack.push(internal_name.to_string());
    }

    pub fn pop_class(&mut self) {
        self.class_stack.pop();
    }

    pub fn current_class(&self) -> Option<&str> {
        self.class_stack.last().map(String::as_str)
    }

    /// Issues the next synthesized-artifact number. Monotonic per context.
    pub fn next_artifact_index(&mut self) -> u32 {
        let n = self.artifact_counter;
        self.artifact_counter += 1;
        n
    }

    // ---- method scopes ----

    pub fn push_method_scope(&mut self, this_binding: ThisBinding) {
        self.scopes.push(MethodScope::new(this_binding));
    }

    pub fn pop_method_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    fn scope(&self) -> &MethodScope {
        self.scopes.last().expect("no method scope pushed")
    }

    fn scope_mut(&mut self) -> &mut MethodScope {
        self.scopes.last_mut().expect("no method scope pushed")
    }

    pub fn this_binding(&self) -> &ThisBinding {
        &self.scope().this_binding
    }

    /// Allocates a slot for a local; wide primitives take two.
    pub fn declare_local(&mut self, name: &str, descriptor: &str) -> u16 {
        let scope = self.scope_mut();
        let slot = scope.next_slot;
        scope.next_slot += descriptor::slot_width(descriptor);
        scope.max_slot = scope.max_slot.max(scope.next_slot);
        scope.locals.insert(
            name.to_string(),
            LocalSlot {
                slot,
                descriptor: descriptor.to_string(),
            },
        );
        slot
    }

    /// Slots needed by the current scope, for the Code attribute.
    pub fn max_locals(&self) -> u16 {
        self.scope().max_slot
    }

    /// Records a captured variable on the current closure scope, in capture
    /// order. Re-recording the same name is a no-op.
    pub fn record_capture(&mut self, capture: Capture) {
        let scope = self.scope_mut();
        if !scope.captures.iter().any(|c| c.name == capture.name) {
            scope.captures.push(capture);
        }
    }

    pub fn captures(&self) -> &[Capture] {
        &self.scope().captures
    }

    /// Ordered resolution over the scope stack: a local of the current scope,
    /// then a recorded capture, then nothing. Enclosing-scope locals are only
    /// reachable through captures recorded by closure analysis.
    pub fn resolve(&self, name: &str) -> Resolution {
        let Some(scope) = self.scopes.last() else {
            return Resolution::Unresolved;
        };
        if let Some(local) = scope.locals.get(name) {
            return Resolution::Local(local.clone());
        }
        if let Some(capture) = scope.captures.iter().find(|c| c.name == name) {
            return Resolution::Captured(capture.clone());
        }
        Resolution::Unresolved
    }

    // ---- inference scopes ----

    pub fn push_inference_scope(&mut self) {
        self.inference.push(FxHashMap::default());
    }

    pub fn pop_inference_scope(&mut self) {
        self.inference.pop();
    }

    pub fn set_inferred(&mut self, name: &str, descriptor: &str) {
        if let Some(scope) = self.inference.last_mut() {
            scope.insert(name.to_string(), descriptor.to_string());
        }
    }

    /// Searches inference scopes innermost-first, then falls back to the
    /// slot table.
    pub fn inferred_type(&self, name: &str) -> Option<String> {
        for scope in self.inference.iter().rev() {
            if let Some(desc) = scope.get(name) {
                return Some(desc.clone());
            }
        }
        match self.resolve(name) {
            Resolution::Local(local) => Some(local.descriptor),
            Resolution::Captured(capture) => Some(capture.descriptor),
            Resolution::Unresolved => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_allocation_widths() {
        let mut ctx = CompilationContext::new();
        ctx.push_method_scope(ThisBinding::None);
        assert_eq!(ctx.declare_local("a", "I"), 0);
        assert_eq!(ctx.declare_local("b", "D"), 1);
        assert_eq!(ctx.declare_local("c", "I"), 3);
        assert_eq!(ctx.max_locals(), 4);
    }

    #[test]
    fn test_instance_scope_reserves_slot_zero() {
        let mut ctx = CompilationContext::new();
        ctx.push_method_scope(ThisBinding::Receiver {
            class: "com/example/Main".to_string(),
        });
        assert_eq!(ctx.declare_local("a", "I"), 1);
    }

    #[test]
    fn test_resolution_order() {
        let mut ctx = CompilationContext::new();
        ctx.push_method_scope(ThisBinding::None);
        ctx.declare_local("x", "I");
        ctx.record_capture(Capture {
            name: "y".to_string(),
            field_name: "cap$y".to_string(),
            descriptor: "J".to_string(),
            source: CaptureSource::Slot(3),
        });
        assert!(matches!(ctx.resolve("x"), Resolution::Local(_)));
        assert!(matches!(ctx.resolve("y"), Resolution::Captured(_)));
        assert_eq!(ctx.resolve("z"), Resolution::Unresolved);
    }

    #[test]
    fn test_capture_recording_is_idempotent() {
        let mut ctx = CompilationContext::new();
        ctx.push_method_scope(ThisBinding::None);
        let capture = Capture {
            name: "n".to_string(),
            field_name: "cap$n".to_string(),
            descriptor: "I".to_string(),
            source: CaptureSource::Slot(0),
        };
        ctx.record_capture(capture.clone());
        ctx.record_capture(capture);
        assert_eq!(ctx.captures().len(), 1);
    }

    #[test]
    fn test_synthetic_scope_reserves_slot_zero() {
        let mut ctx = CompilationContext::new();
        ctx.push_method_scope(ThisBinding::Synthetic);
        assert_eq!(ctx.declare_local("x", "I"), 1);
    }

    #[test]
    fn test_inference_scope_shadows_slots() {
        let mut ctx = CompilationContext::new();
        ctx.push_method_scope(ThisBinding::None);
        ctx.declare_local("x", "I");
        ctx.push_inference_scope();
        ctx.set_inferred("x", "D");
        assert_eq!(ctx.inferred_type("x").as_deref(), Some("D"));
        ctx.pop_inference_scope();
        assert_eq!(ctx.inferred_type("x").as_deref(), Some("I"));
    }

    #[test]
    fn test_artifact_counter_is_monotonic() {
        let mut ctx = CompilationContext::new();
        assert_eq!(ctx.next_artifact_index(), 0);
        assert_eq!(ctx.next_artifact_index(), 1);
        let mut other = CompilationContext::new();
        assert_eq!(other.next_artifact_index(), 0);
    }
}
