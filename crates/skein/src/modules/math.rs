//! The `math` module: constants, float functions and a few integer helpers.
//!
//! Float functions accept any real number. Results that leave the float domain raise
//! `ValueError("math domain error")`, overflows raise `OverflowError("math range error")`.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, One};
use strum::{EnumIter, IntoStaticStr};

use super::{ModuleFunction, export_functions, export_value};
use crate::{
    args::ArgValues,
    bytecode::VM,
    exception_private::{ExcType, RunError, RunResult},
    heap::HeapId,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::number::Number,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum MathFunction {
    Ceil,
    Floor,
    Trunc,
    Fabs,
    Sqrt,
    Pow,
    Exp,
    Log,
    Log2,
    Log10,
    Sin,
    Cos,
    Tan,
    Isnan,
    Isinf,
    Isfinite,
    Gcd,
    Factorial,
}

pub(super) fn create_module<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
) -> RunResult<HeapId> {
    let module = vm.new_module("math")?;
    export_value(vm, module, "pi", Value::Float(std::f64::consts::PI))?;
    export_value(vm, module, "e", Value::Float(std::f64::consts::E))?;
    export_value(vm, module, "tau", Value::Float(std::f64::consts::TAU))?;
    export_value(vm, module, "inf", Value::Float(f64::INFINITY))?;
    export_value(vm, module, "nan", Value::Float(f64::NAN))?;
    export_functions(vm, module, ModuleFunction::Math)?;
    Ok(module)
}

pub(super) fn call<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    function: MathFunction,
    args: ArgValues,
) -> RunResult<Value> {
    let name: &'static str = function.into();
    match function {
        MathFunction::Ceil => round_to_int(vm, args, name, f64::ceil),
        MathFunction::Floor => round_to_int(vm, args, name, f64::floor),
        MathFunction::Trunc => round_to_int(vm, args, name, f64::trunc),
        MathFunction::Fabs => unary(vm, args, name, f64::abs),
        MathFunction::Sqrt => unary(vm, args, name, f64::sqrt),
        MathFunction::Exp => unary(vm, args, name, f64::exp),
        MathFunction::Sin => unary(vm, args, name, f64::sin),
        MathFunction::Cos => unary(vm, args, name, f64::cos),
        MathFunction::Tan => unary(vm, args, name, f64::tan),
        MathFunction::Log2 => positive_log(vm, args, name, f64::log2),
        MathFunction::Log10 => positive_log(vm, args, name, f64::log10),
        MathFunction::Log => {
            let (x, base) = args.get_one_two_args(name, &vm.interns)?;
            let x = real(vm, x)?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match base {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = real(vm, base)?;
                    if base <= 0.0 {
                        return Err(domain_error());
                    }
                    if base == 1.0 {
                        return Err(ExcType::zero_division("float division by zero"));
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        MathFunction::Pow => {
            let (x, y) = args.get_two_args(name, &vm.interns)?;
            let (x, y) = (real(vm, x)?, real(vm, y)?);
            if x == 0.0 && y < 0.0 {
                return Err(domain_error());
            }
            checked(x.powf(y), &[x, y])
        }
        MathFunction::Isnan => predicate(vm, args, name, f64::is_nan),
        MathFunction::Isinf => predicate(vm, args, name, f64::is_infinite),
        MathFunction::Isfinite => predicate(vm, args, name, f64::is_finite),
        MathFunction::Gcd => {
            args.check_no_kwargs(name, &vm.interns)?;
            let mut result = BigInt::default();
            for value in args.positional {
                result = result.gcd(&vm.expect_bigint(value)?);
            }
            vm.new_int(result)
        }
        MathFunction::Factorial => {
            let value = args.get_one_arg(name, &vm.interns)?;
            let n = vm.expect_int(value)?;
            if n < 0 {
                return Err(ExcType::value_error("factorial() not defined for negative values"));
            }
            let mut result = BigInt::one();
            for i in 2..=n {
                result *= i;
            }
            vm.new_int(result)
        }
    }
}

/// A real argument as `f64`; `int` arguments convert with CPython's overflow message.
fn real<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(vm: &VM<'_, T, P, Tr>, value: Value) -> RunResult<f64> {
    match vm.number(value) {
        Some(number) => number.to_f64(),
        None => Err(ExcType::type_error(format!(
            "must be real number, not {}",
            vm.type_name(value)
        ))),
    }
}

fn domain_error() -> RunError {
    ExcType::value_error("math domain error")
}

/// Maps a NaN or infinite result from finite inputs to the matching math error.
fn checked(result: f64, inputs: &[f64]) -> RunResult<Value> {
    let finite_inputs = inputs.iter().all(|x| x.is_finite());
    if result.is_nan() && !inputs.iter().any(|x| x.is_nan()) {
        Err(domain_error())
    } else if result.is_infinite() && finite_inputs {
        Err(ExcType::overflow_error("math range error"))
    } else {
        Ok(Value::Float(result))
    }
}

fn unary<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
    name: &str,
    f: fn(f64) -> f64,
) -> RunResult<Value> {
    let value = args.get_one_arg(name, &vm.interns)?;
    let x = real(vm, value)?;
    checked(f(x), &[x])
}

fn positive_log<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
    name: &str,
    f: fn(f64) -> f64,
) -> RunResult<Value> {
    let value = args.get_one_arg(name, &vm.interns)?;
    let x = real(vm, value)?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    Ok(Value::Float(f(x)))
}

fn predicate<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
    name: &str,
    f: fn(f64) -> bool,
) -> RunResult<Value> {
    let value = args.get_one_arg(name, &vm.interns)?;
    Ok(Value::Bool(f(real(vm, value)?)))
}

/// `ceil`, `floor` and `trunc`: integers pass through, floats round to an `int`.
fn round_to_int<T: ResourceTracker, P: PrintWriter, Tr: VmTracer>(
    vm: &mut VM<'_, T, P, Tr>,
    args: ArgValues,
    name: &str,
    f: fn(f64) -> f64,
) -> RunResult<Value> {
    let value = args.get_one_arg(name, &vm.interns)?;
    match vm.number(value) {
        Some(Number::Float(x)) => {
            if x.is_nan() {
                return Err(ExcType::value_error("cannot convert float NaN to integer"));
            }
            if x.is_infinite() {
                return Err(ExcType::overflow_error("cannot convert float infinity to integer"));
            }
            vm.new_int(BigInt::from_f64(f(x)).unwrap_or_default())
        }
        Some(Number::Int(i)) => Ok(Value::Int(i)),
        Some(Number::Big(big)) => vm.new_int(big),
        None => Err(ExcType::type_error(format!(
            "must be real number, not {}",
            vm.type_name(value)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use num_traits::Signed;

    use super::*;

    #[test]
    fn checked_maps_errors() {
        assert!(matches!(checked(f64::NAN, &[-1.0]), Err(_)));
        assert!(matches!(checked(f64::INFINITY, &[1000.0]), Err(_)));
        assert!(matches!(checked(f64::INFINITY, &[f64::INFINITY]), Ok(Value::Float(_))));
        assert!(matches!(checked(2.0, &[4.0]), Ok(Value::Float(x)) if x == 2.0));
    }

    #[test]
    fn bigint_gcd_is_non_negative() {
        let a = BigInt::from(-12);
        assert!(!BigInt::default().gcd(&a).is_negative());
    }
}
