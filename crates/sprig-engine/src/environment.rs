//! State shared by the runtimes of one embedding.

use std::cell::RefCell;
use std::rc::Rc;

use sprig_types::{FuncType, FuncTypePool, TypesResult};

use crate::code::CodePage;

#[derive(Debug, Default)]
struct Shared {
    types: FuncTypePool,
    released: Vec<CodePage>,
}

/// The function-type intern pool and the pool of code pages released by
/// dropped runtimes.
///
/// Cloning is cheap and shares the same state. An environment is scoped to
/// the runtimes created from it; nothing here is process-wide.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    shared: Rc<RefCell<Shared>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical handle for `ty`. Interning the same sequences twice
    /// returns the same `Rc`.
    pub fn intern(&self, ty: FuncType) -> Rc<FuncType> {
        self.shared.borrow_mut().types.intern(ty)
    }

    /// Intern a compact host signature such as `"i(iI)"`.
    pub fn intern_signature(&self, signature: &str) -> TypesResult<Rc<FuncType>> {
        self.shared.borrow_mut().types.intern_signature(signature)
    }

    pub fn num_types(&self) -> usize {
        self.shared.borrow().types.len()
    }

    /// Pages waiting to be reused by a runtime.
    pub fn released_pages(&self) -> usize {
        self.shared.borrow().released.len()
    }

    pub(crate) fn take_page(&self, min_lines: u32) -> Option<CodePage> {
        let mut shared = self.shared.borrow_mut();
        let pos = shared
            .released
            .iter()
            .position(|p| p.capacity() >= min_lines)?;
        Some(shared.released.swap_remove(pos))
    }

    pub(crate) fn release_pages(&self, pages: Vec<CodePage>) {
        self.shared.borrow_mut().released.extend(pages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprig_types::ValueType;

    #[test]
    fn interning_is_idempotent_across_clones() {
        let env = Environment::new();
        let other = env.clone();
        let a = env.intern(FuncType::new(vec![ValueType::I32], vec![ValueType::I64]));
        let b = other.intern(FuncType::new(vec![ValueType::I32], vec![ValueType::I64]));
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(env.num_types(), 1);
    }

    #[test]
    fn signatures_share_the_pool() {
        let env = Environment::new();
        let parsed = env.intern_signature("I(i)").unwrap();
        let built = env.intern(FuncType::new(vec![ValueType::I32], vec![ValueType::I64]));
        assert!(Rc::ptr_eq(&parsed, &built));
    }
}
