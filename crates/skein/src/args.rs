use smallvec::SmallVec;

use crate::{
    exception_private::{ExcType, RunResult},
    intern::{Interns, StringId},
    value::Value,
};

/// Arguments of one call after `*args` and `**kwargs` expansion.
///
/// Most calls pass at most three positional arguments, which stay inline.
#[derive(Debug, Default, Clone)]
pub(crate) struct ArgValues {
    pub positional: SmallVec<[Value; 3]>,
    /// Keyword arguments in call order.
    pub kwargs: Vec<(StringId, Value)>,
}

impl ArgValues {
    #[must_use]
    pub fn new(positional: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: positional.into_iter().collect(),
            kwargs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_kwargs(positional: impl IntoIterator<Item = Value>, kwargs: Vec<(StringId, Value)>) -> Self {
        Self {
            positional: positional.into_iter().collect(),
            kwargs,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn one(value: Value) -> Self {
        Self::new([value])
    }

    /// Prepends an implicit receiver, as when calling a bound method.
    pub fn prepend(&mut self, value: Value) {
        self.positional.insert(0, value);
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.positional.len() + self.kwargs.len()
    }

    /// Removes and returns the keyword argument `name`, if given.
    pub fn take_kwarg(&mut self, name: StringId) -> Option<Value> {
        let index = self.kwargs.iter().position(|(key, _)| *key == name)?;
        Some(self.kwargs.remove(index).1)
    }

    /// Fails if any keyword argument is left over.
    pub fn check_no_kwargs(&self, func_name: &str, interns: &Interns) -> RunResult<()> {
        match self.kwargs.first() {
            None => Ok(()),
            Some(_) if self.kwargs.len() == self.count() && self.positional.is_empty() => {
                Err(ExcType::type_error_no_kwargs(func_name))
            }
            Some((key, _)) => Err(ExcType::type_error_unexpected_keyword(func_name, interns.get_str(*key))),
        }
    }

    pub fn check_zero_args(self, name: &str, interns: &Interns) -> RunResult<()> {
        self.check_no_kwargs(name, interns)?;
        if self.positional.is_empty() {
            Ok(())
        } else {
            Err(ExcType::type_error_no_args(name, self.positional.len()))
        }
    }

    pub fn get_one_arg(self, name: &str, interns: &Interns) -> RunResult<Value> {
        self.check_no_kwargs(name, interns)?;
        match self.positional.as_slice() {
            [a] => Ok(*a),
            other => Err(ExcType::type_error_arg_count(name, 1, other.len())),
        }
    }

    pub fn get_two_args(self, name: &str, interns: &Interns) -> RunResult<(Value, Value)> {
        self.check_no_kwargs(name, interns)?;
        match self.positional.as_slice() {
            [a, b] => Ok((*a, *b)),
            other => Err(ExcType::type_error_arg_count(name, 2, other.len())),
        }
    }

    pub fn get_three_args(self, name: &str, interns: &Interns) -> RunResult<(Value, Value, Value)> {
        self.check_no_kwargs(name, interns)?;
        match self.positional.as_slice() {
            [a, b, c] => Ok((*a, *b, *c)),
            other => Err(ExcType::type_error_arg_count(name, 3, other.len())),
        }
    }

    pub fn get_zero_one_arg(self, name: &str, interns: &Interns) -> RunResult<Option<Value>> {
        self.check_no_kwargs(name, interns)?;
        match self.positional.as_slice() {
            [] => Ok(None),
            [a] => Ok(Some(*a)),
            other => Err(ExcType::type_error_at_most(name, 1, other.len())),
        }
    }

    pub fn get_one_two_args(self, name: &str, interns: &Interns) -> RunResult<(Value, Option<Value>)> {
        self.check_no_kwargs(name, interns)?;
        match self.positional.as_slice() {
            [a] => Ok((*a, None)),
            [a, b] => Ok((*a, Some(*b))),
            [] => Err(ExcType::type_error_at_least(name, 1, 0)),
            other => Err(ExcType::type_error_at_most(name, 2, other.len())),
        }
    }

    pub fn get_zero_one_two_args(self, name: &str, interns: &Interns) -> RunResult<(Option<Value>, Option<Value>)> {
        self.check_no_kwargs(name, interns)?;
        match self.positional.as_slice() {
            [] => Ok((None, None)),
            [a] => Ok((Some(*a), None)),
            [a, b] => Ok((Some(*a), Some(*b))),
            other => Err(ExcType::type_error_at_most(name, 2, other.len())),
        }
    }

    /// Positional arguments between `min` and `max`, keyword arguments rejected.
    pub fn get_range(self, name: &str, min: usize, max: usize, interns: &Interns) -> RunResult<SmallVec<[Value; 3]>> {
        self.check_no_kwargs(name, interns)?;
        let count = self.positional.len();
        if count < min {
            Err(ExcType::type_error_at_least(name, min, count))
        } else if count > max {
            Err(ExcType::type_error_at_most(name, max, count))
        } else {
            Ok(self.positional)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StaticStrings;

    #[test]
    fn take_kwarg_removes_it() {
        let interns = Interns::new();
        let mut args = ArgValues::with_kwargs([Value::Int(1)], vec![(StaticStrings::Key.id(), Value::None)]);
        assert_eq!(args.take_kwarg(StaticStrings::Key.id()), Some(Value::None));
        assert_eq!(args.take_kwarg(StaticStrings::Key.id()), None);
        assert_eq!(args.get_one_arg("f", &interns).unwrap(), Value::Int(1));
    }

    #[test]
    fn leftover_kwargs_are_rejected() {
        let interns = Interns::new();
        let args = ArgValues::with_kwargs([Value::Int(1)], vec![(StaticStrings::Sep.id(), Value::None)]);
        let err = args.get_one_arg("len", &interns).unwrap_err();
        assert!(err.is_exc_type(ExcType::TypeError));
    }

    #[test]
    fn arity_errors() {
        let interns = Interns::new();
        assert!(ArgValues::empty().get_one_arg("len", &interns).is_err());
        assert!(
            ArgValues::new([Value::None, Value::None, Value::None])
                .get_one_two_args("iter", &interns)
                .is_err()
        );
        let (a, b) = ArgValues::one(Value::Bool(true)).get_one_two_args("iter", &interns).unwrap();
        assert_eq!(a, Value::Bool(true));
        assert_eq!(b, None);
    }
}
