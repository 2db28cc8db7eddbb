//! Class objects, instances and C3 linearisation.

use indexmap::IndexMap;

use crate::{
    exception_private::{ExcType, RawStackFrame},
    heap::HeapId,
    intern::StringId,
    value::Value,
};

/// A class created by a `class` statement, or one of the builtin classes (`object` and the
/// exception hierarchy) created at start-up.
#[derive(Debug)]
pub(crate) struct ClassObject {
    pub name: StringId,
    pub qualname: String,
    /// Value of `__module__`; `None` for builtin classes.
    pub module: Option<StringId>,
    pub bases: Vec<HeapId>,
    /// Method resolution order, starting with the class itself.
    pub mro: Vec<HeapId>,
    pub attrs: IndexMap<StringId, Value>,
    /// Nearest builtin exception class in the MRO, for classes deriving from `BaseException`.
    pub exc_type: Option<ExcType>,
}

/// An instance of a [`ClassObject`].
#[derive(Debug)]
pub(crate) struct Instance {
    pub class: HeapId,
    pub attrs: IndexMap<StringId, Value>,
    /// Traceback recorded the last time this exception instance was raised.
    pub traceback: Vec<RawStackFrame>,
}

impl Instance {
    #[must_use]
    pub fn new(class: HeapId) -> Self {
        Self {
            class,
            attrs: IndexMap::new(),
            traceback: Vec::new(),
        }
    }
}

/// Computes the C3 linearisation of a class.
///
/// `base_mros` holds the MRO of each direct base in declaration order. When no consistent order
/// exists (e.g. `class C(A, B)` where `B` already precedes `A`), the error holds the classes that
/// could not be placed.
pub(crate) fn c3_linearize(
    class: HeapId,
    bases: &[HeapId],
    base_mros: &[Vec<HeapId>],
) -> Result<Vec<HeapId>, Vec<HeapId>> {
    let mut sequences: Vec<Vec<HeapId>> = base_mros.iter().filter(|mro| !mro.is_empty()).cloned().collect();
    if !bases.is_empty() {
        sequences.push(bases.to_vec());
    }
    let mut result = vec![class];
    loop {
        sequences.retain(|sequence| !sequence.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        let heads = sequences.iter().map(|sequence| sequence[0]);
        let Some(candidate) = heads.clone().find(|head| {
            sequences
                .iter()
                .all(|sequence| !sequence[1..].contains(head))
        }) else {
            let mut blocked = Vec::new();
            for head in heads {
                if !blocked.contains(&head) {
                    blocked.push(head);
                }
            }
            return Err(blocked);
        };
        result.push(candidate);
        for sequence in &mut sequences {
            if sequence[0] == candidate {
                sequence.remove(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> [HeapId; 6] {
        std::array::from_fn(HeapId::from_index)
    }

    #[test]
    fn single_inheritance() {
        let [object, animal, dog, ..] = ids();
        let animal_mro = c3_linearize(animal, &[object], &[vec![object]]).unwrap();
        assert_eq!(animal_mro, vec![animal, object]);
        let dog_mro = c3_linearize(dog, &[animal], &[animal_mro]).unwrap();
        assert_eq!(dog_mro, vec![dog, animal, object]);
    }

    #[test]
    fn diamond() {
        let [object, a, b, c, d, _] = ids();
        let a_mro = vec![a, object];
        let b_mro = c3_linearize(b, &[a], &[a_mro.clone()]).unwrap();
        let c_mro = c3_linearize(c, &[a], &[a_mro]).unwrap();
        let d_mro = c3_linearize(d, &[b, c], &[b_mro, c_mro]).unwrap();
        assert_eq!(d_mro, vec![d, b, c, a, object]);
    }

    #[test]
    fn inconsistent_order_is_rejected() {
        let [object, a, b, c, ..] = ids();
        let a_mro = vec![a, object];
        let b_mro = c3_linearize(b, &[a], &[a_mro.clone()]).unwrap();
        // class C(A, B) where B derives from A
        assert_eq!(c3_linearize(c, &[a, b], &[a_mro, b_mro]), Err(vec![a, b]));
    }
}
