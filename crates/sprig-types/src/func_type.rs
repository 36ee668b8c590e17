//! Function types and the function-type intern pool.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::{TypeError, TypesResult, ValueType};

/// Ordered result types followed by ordered parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    results: Vec<ValueType>,
    params: Vec<ValueType>,
}

impl FuncType {
    pub fn new(params: impl Into<Vec<ValueType>>, results: impl Into<Vec<ValueType>>) -> Self {
        Self {
            results: results.into(),
            params: params.into(),
        }
    }

    /// Parse the compact host notation, e.g. `"i(iI)"` or `"v()"`.
    ///
    /// The leading character is the result (`v` for none), the parenthesized
    /// list the parameters. Whitespace is ignored.
    pub fn from_signature(signature: &str) -> TypesResult<Self> {
        let invalid = |reason: &str| TypeError::InvalidSignature {
            signature: signature.to_string(),
            reason: reason.to_string(),
        };
        let mut chars = signature.chars().filter(|c| !c.is_whitespace());

        let results = match chars.next() {
            Some('v') => Vec::new(),
            Some(c) => vec![ValueType::from_signature_char(c).ok_or_else(|| invalid("unknown result type"))?],
            None => return Err(invalid("empty signature")),
        };
        if chars.next() != Some('(') {
            return Err(invalid("expected '('"));
        }

        let mut params = Vec::new();
        loop {
            match chars.next() {
                Some(')') => break,
                Some(c) => params.push(
                    ValueType::from_signature_char(c).ok_or_else(|| invalid("unknown parameter type"))?,
                ),
                None => return Err(invalid("missing ')'")),
            }
        }
        if chars.next().is_some() {
            return Err(invalid("trailing characters"));
        }
        Ok(Self { results, params })
    }

    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    pub fn results(&self) -> &[ValueType] {
        &self.results
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.results.as_slice() {
            [] => f.write_str("v")?,
            results => {
                for r in results {
                    write!(f, "{}", r.signature_char())?;
                }
            }
        }
        f.write_str("(")?;
        for p in &self.params {
            write!(f, "{}", p.signature_char())?;
        }
        f.write_str(")")
    }
}

/// True when two handles denote the same signature: identity first, content
/// as the fallback for types that never went through a pool.
pub fn same_type(a: &Rc<FuncType>, b: &Rc<FuncType>) -> bool {
    Rc::ptr_eq(a, b) || **a == **b
}

/// Structural intern pool for function types.
///
/// Owned by one environment; two structurally equal types interned in the
/// same pool come back as the same `Rc`.
#[derive(Debug, Default)]
pub struct FuncTypePool {
    types: HashSet<Rc<FuncType>>,
}

impl FuncTypePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, ty: FuncType) -> Rc<FuncType> {
        if let Some(existing) = self.types.get(&ty) {
            return Rc::clone(existing);
        }
        let ty = Rc::new(ty);
        self.types.insert(Rc::clone(&ty));
        ty
    }

    /// Intern a type given in the compact host notation.
    pub fn intern_signature(&mut self, signature: &str) -> TypesResult<Rc<FuncType>> {
        Ok(self.intern(FuncType::from_signature(signature)?))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ValueType::*;

    #[test]
    fn test_signature_parse() {
        let ty = FuncType::from_signature("i(iI)").unwrap();
        assert_eq!(ty.results(), &[I32]);
        assert_eq!(ty.params(), &[I32, I64]);
    }

    #[test]
    fn test_signature_void_no_params() {
        let ty = FuncType::from_signature("v()").unwrap();
        assert_eq!(ty, FuncType::default());
    }

    #[test]
    fn test_signature_rejects_garbage() {
        assert!(FuncType::from_signature("").is_err());
        assert!(FuncType::from_signature("x()").is_err());
        assert!(FuncType::from_signature("i(i").is_err());
        assert!(FuncType::from_signature("i(q)").is_err());
        assert!(FuncType::from_signature("i()i").is_err());
    }

    #[test]
    fn test_display_round_trips_signature() {
        for sig in ["v()", "i(iI)", "F(fF)"] {
            assert_eq!(FuncType::from_signature(sig).unwrap().to_string(), sig);
        }
    }

    #[test]
    fn test_intern_shares_instance() {
        let mut pool = FuncTypePool::new();
        let a = pool.intern(FuncType::new([I32, I32], [I64]));
        let b = pool.intern(FuncType::new(vec![I32, I32], vec![I64]));
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_same_type_falls_back_to_content() {
        let mut pool = FuncTypePool::new();
        let pooled = pool.intern_signature("i(i)").unwrap();
        let loose = Rc::new(FuncType::from_signature("i(i)").unwrap());
        assert!(same_type(&pooled, &loose));
        assert!(!same_type(&pooled, &Rc::new(FuncType::from_signature("v(i)").unwrap())));
    }
}
