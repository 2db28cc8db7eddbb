//! `abs()`, `divmod()`, `pow()` and `round()`.

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, Zero};

use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunResult},
    expressions::Operator,
    fstring::{round_float, round_int},
    intern::StaticStrings,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::number::{self, Number},
    value::Value,
};

pub fn builtin_abs<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let value = args.get_one_arg("abs", &vm.interns)?;
    if let Some(number) = vm.number(value) {
        return vm.number_value(number::abs(&number));
    }
    if let Some(method) = vm.user_special(value, StaticStrings::DunderAbs.id())? {
        return vm.call_sync(method, ArgValues::empty());
    }
    Err(ExcType::type_error(format!(
        "bad operand type for abs(): '{}'",
        vm.type_name(value)
    )))
}

pub fn builtin_divmod<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (left, right) = args.get_two_args("divmod", &vm.interns)?;
    let (Some(a), Some(b)) = (vm.number(left), vm.number(right)) else {
        return Err(ExcType::binary_type_error(
            "divmod()",
            &vm.type_name(left),
            &vm.type_name(right),
        ));
    };
    let (quotient, remainder) = number::divmod(&a, &b)?;
    let quotient = vm.number_value(quotient)?;
    let remainder = vm.number_value(remainder)?;
    vm.new_tuple(vec![quotient, remainder])
}

/// `pow(base, exp, mod=None)`; the three-argument form is modular exponentiation on integers.
pub fn builtin_pow<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let values = args.get_range("pow", 2, 3, &vm.interns)?;
    let (base, exp) = (values[0], values[1]);
    let modulus = values.get(2).copied().filter(|m| !m.is_none());
    let Some(modulus) = modulus else {
        return vm.binary_op(base, exp, Operator::Pow);
    };
    let ints = (vm.number(base), vm.number(exp), vm.number(modulus));
    let (Some(base), Some(exp), Some(modulus)) = ints else {
        return Err(ExcType::type_error(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    let (Some(base), Some(exp), Some(modulus)) = (base.to_bigint(), exp.to_bigint(), modulus.to_bigint()) else {
        return Err(ExcType::type_error(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    if modulus.is_zero() {
        return Err(ExcType::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp.is_negative() {
        return Err(ExcType::value_error(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    let mut result = base.modpow(&exp, &modulus);
    // modpow follows the dividend's sign; Python follows the modulus
    if !result.is_zero() && result.is_negative() != modulus.is_negative() {
        result += &modulus;
    }
    vm.new_int(result)
}

/// `round(number, ndigits=None)`, rounding halves to even.
pub fn builtin_round<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
) -> RunResult<Value> {
    let (value, ndigits) = args.get_one_two_args("round", &vm.interns)?;
    let ndigits = match ndigits {
        None | Some(Value::None) => None,
        Some(ndigits) => Some(vm.expect_int(ndigits)?),
    };
    let Some(number) = vm.number(value) else {
        return Err(ExcType::type_error(format!(
            "type {} doesn't define __round__ method",
            vm.type_name(value)
        )));
    };
    match (number, ndigits) {
        (Number::Float(f), None) => {
            if f.is_nan() {
                return Err(ExcType::value_error("cannot convert float NaN to integer"));
            }
            if f.is_infinite() {
                return Err(ExcType::overflow_error("cannot convert float infinity to integer"));
            }
            let rounded = round_float(f, 0);
            let int = BigInt::from_f64(rounded).unwrap_or_default();
            vm.new_int(int)
        }
        (Number::Float(f), Some(ndigits)) => Ok(Value::Float(round_float(f, ndigits))),
        (number, ndigits) => {
            let int = number.to_bigint().unwrap_or_default();
            vm.new_int(round_int(&int, ndigits.unwrap_or(0)))
        }
    }
}
