//! Overload and constructor resolution
//!
//! Selection runs in two phases. First every candidate whose parameter count
//! equals the number of arguments is checked position by position without
//! side effects, and scored: an exact fit costs 0, nil passed to a
//! reference type costs 1, a parameter declared `Any` costs 2. The cheapest
//! candidate wins, ties going to the earliest declaration. Only the winner's
//! arguments are then converted (which may pin values as handles).
//!
//! Script arguments are checked on the stack, host arguments as values; both
//! share the cost scale and the selection loop so a call picks the same
//! overload from either side.

use std::sync::Arc;

use luabridge_stack::{LuaStack, ValueKind};
use tracing::trace;

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::ReferenceHandle;
use crate::host::{
    ClassDescriptor, ClassRegistry, ConstructorDescriptor, HostObject, HostType, HostValue, MethodDescriptor, Signature,
};
use crate::marshal::{self, HostCell};
use crate::options::NumericCoercion;

const EXACT: u32 = 0;
const NIL_TO_REFERENCE: u32 = 1;
const ANY: u32 = 2;

// ============================================================================
// Numbers
// ============================================================================

fn integral_within(n: f64, min: f64, max: f64) -> bool {
    n.fract() == 0.0 && n >= min && n <= max
}

/// Script number `n` may be passed as `ty` under `coercion`
pub fn number_fits(n: f64, ty: &HostType, coercion: NumericCoercion) -> bool {
    if !ty.is_numeric() {
        return false;
    }
    if coercion == NumericCoercion::Truncate {
        return true;
    }
    match ty {
        HostType::I8 => integral_within(n, i8::MIN as f64, i8::MAX as f64),
        HostType::I16 => integral_within(n, i16::MIN as f64, i16::MAX as f64),
        HostType::I32 => integral_within(n, i32::MIN as f64, i32::MAX as f64),
        // i64::MAX is not representable; 2^63 is the first value past it
        HostType::I64 => n.fract() == 0.0 && n >= i64::MIN as f64 && n < 9_223_372_036_854_775_808.0,
        HostType::F32 => !n.is_finite() || n.abs() <= f32::MAX as f64,
        _ => true,
    }
}

/// Narrow `n` to the exact numeric type `ty` (saturating `as` casts)
pub fn narrow_number(n: f64, ty: &HostType) -> Option<HostValue> {
    let value = match ty {
        HostType::I8 => HostValue::I8(n as i8),
        HostType::I16 => HostValue::I16(n as i16),
        HostType::I32 => HostValue::I32(n as i32),
        HostType::I64 => HostValue::I64(n as i64),
        HostType::F32 => HostValue::F32(n as f32),
        HostType::F64 => HostValue::F64(n),
        _ => return None,
    };
    Some(value)
}

/// Check then narrow
pub fn coerce_number(n: f64, ty: &HostType, coercion: NumericCoercion) -> Option<HostValue> {
    if number_fits(n, ty, coercion) {
        narrow_number(n, ty)
    } else {
        None
    }
}

// ============================================================================
// Argument checks
// ============================================================================

/// Cost of passing the slot at `idx` as the `position`th argument of type
/// `expected`, or the reason it cannot be passed. Has no side effects.
pub fn check_argument(
    stack: LuaStack,
    idx: i32,
    position: usize,
    expected: &HostType,
    classes: &ClassRegistry,
    coercion: NumericCoercion,
) -> BridgeResult<u32> {
    if *expected == HostType::Any {
        return Ok(ANY);
    }
    let fits = match stack.kind(idx) {
        ValueKind::Boolean => *expected == HostType::Bool,
        ValueKind::String => match expected {
            HostType::Str => stack
                .read_bytes(idx)
                .is_some_and(|bytes| std::str::from_utf8(&bytes).is_ok()),
            HostType::Bytes => true,
            _ => false,
        },
        ValueKind::Number => number_fits(stack.to_number(idx), expected, coercion),
        ValueKind::Function | ValueKind::Table | ValueKind::Thread | ValueKind::LightUserdata => {
            *expected == HostType::Script
        }
        ValueKind::Userdata => match marshal::host_cell_at(stack, idx) {
            Some(HostCell::Object(o)) => is_object_of(classes, &o, expected),
            Some(HostCell::Class(_)) => *expected == HostType::Class,
            Some(HostCell::Function(_)) => *expected == HostType::Function,
            _ => *expected == HostType::Script,
        },
        ValueKind::Nil | ValueKind::None => {
            if !expected.is_primitive() && *expected != HostType::Void {
                return Ok(NIL_TO_REFERENCE);
            }
            false
        }
    };
    if fits {
        Ok(EXACT)
    } else {
        Err(BridgeError::InvalidParameter {
            position,
            expected: expected.to_string(),
            found: marshal::describe_slot(stack, idx),
        })
    }
}

fn is_object_of(classes: &ClassRegistry, object: &HostObject, expected: &HostType) -> bool {
    matches!(expected, HostType::Object(name) if classes.is_assignable(object.class(), name))
}

/// Cost of passing an already-typed host value as the `position`th argument
/// of type `expected`. Same scale as [`check_argument`].
pub fn check_value(
    value: &HostValue,
    position: usize,
    expected: &HostType,
    classes: &ClassRegistry,
    coercion: NumericCoercion,
) -> BridgeResult<u32> {
    if *expected == HostType::Any {
        return Ok(ANY);
    }
    let fits = match value {
        HostValue::Null => {
            if !expected.is_primitive() && *expected != HostType::Void {
                return Ok(NIL_TO_REFERENCE);
            }
            false
        }
        HostValue::Object(o) => is_object_of(classes, o, expected),
        v if v.is_number() => v.as_f64().is_some_and(|n| number_fits(n, expected, coercion)),
        v => expected.accepts(v),
    };
    if fits {
        Ok(EXACT)
    } else {
        Err(BridgeError::InvalidParameter {
            position,
            expected: expected.to_string(),
            found: value.type_name(),
        })
    }
}

/// Convert an argument already accepted by [`check_argument`]
fn convert_argument(
    ctx: &Arc<BridgeContext>,
    stack: LuaStack,
    idx: i32,
    expected: &HostType,
) -> BridgeResult<HostValue> {
    if *expected == HostType::Any {
        return marshal::to_host(ctx, stack, idx);
    }
    if matches!(stack.kind(idx), ValueKind::Nil | ValueKind::None) {
        return Ok(HostValue::Null);
    }
    let value = match expected {
        HostType::Bool => HostValue::Bool(stack.to_boolean(idx)),
        HostType::Str => HostValue::Str(stack.read_string_lossy(idx).unwrap_or_default()),
        HostType::Bytes => HostValue::Bytes(stack.read_bytes(idx).unwrap_or_default()),
        HostType::Script => HostValue::Ref(ReferenceHandle::from_stack(ctx, stack, idx)?),
        HostType::Object(_) | HostType::Class | HostType::Function => marshal::host_cell_at(stack, idx)
            .and_then(HostCell::into_value)
            .unwrap_or(HostValue::Null),
        ty => narrow_number(stack.to_number(idx), ty).unwrap_or(HostValue::Null),
    };
    Ok(value)
}

// ============================================================================
// Selection
// ============================================================================

/// Cheapest candidate taking `arity` arguments; `cost_of(i, ty)` scores the
/// `i`th argument against a parameter of type `ty`
fn select<'c, S, I>(
    arity: usize,
    candidates: I,
    cost_of: impl Fn(usize, &HostType) -> BridgeResult<u32>,
) -> Option<&'c S>
where
    S: Signature + 'c,
    I: IntoIterator<Item = &'c S>,
{
    let mut best: Option<(u32, &'c S)> = None;
    for candidate in candidates {
        let params = candidate.params();
        if params.len() != arity {
            continue;
        }
        let cost = params
            .iter()
            .enumerate()
            .try_fold(0u32, |total, (i, ty)| cost_of(i, ty).map(|cost| total + cost));
        if let Ok(cost) = cost {
            if best.map_or(true, |(lowest, _)| cost < lowest) {
                best = Some((cost, candidate));
            }
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// [`select`] over the `arity` script arguments starting at `first`
fn select_on_stack<'c, S, I>(
    ctx: &BridgeContext,
    stack: LuaStack,
    first: i32,
    arity: usize,
    candidates: I,
) -> Option<&'c S>
where
    S: Signature + 'c,
    I: IntoIterator<Item = &'c S>,
{
    let classes = ctx.classes();
    let coercion = ctx.options().numeric_coercion;
    select(arity, candidates, |i, ty| {
        check_argument(stack, first + i as i32, i + 1, ty, classes, coercion)
    })
}

fn convert_arguments<S: Signature>(
    ctx: &Arc<BridgeContext>,
    stack: LuaStack,
    first: i32,
    member: &S,
) -> BridgeResult<Vec<HostValue>> {
    member
        .params()
        .iter()
        .enumerate()
        .map(|(i, ty)| convert_argument(ctx, stack, first + i as i32, ty))
        .collect()
}

fn arity_from(stack: LuaStack, first: i32) -> usize {
    (stack.top() - first + 1).max(0) as usize
}

/// Pick the method `name` of `class` for the arguments from `first` to the top
pub(crate) fn resolve_method<'c>(
    ctx: &Arc<BridgeContext>,
    stack: LuaStack,
    class: &'c ClassDescriptor,
    name: &str,
    first: i32,
    static_only: bool,
) -> BridgeResult<(&'c MethodDescriptor, Vec<HostValue>)> {
    let arity = arity_from(stack, first);
    let method = select_on_stack(ctx, stack, first, arity, class.methods_named(name, static_only)).ok_or_else(|| {
        BridgeError::NoMatchingMember {
            class: class.name().to_string(),
            member: name.to_string(),
            arity,
        }
    })?;
    trace!(target: "luabridge::dispatch", class = class.name(), method = name, arity, "method selected");
    let args = convert_arguments(ctx, stack, first, method)?;
    Ok((method, args))
}

/// Pick a constructor of `class` for the arguments from `first` to the top
pub(crate) fn resolve_constructor<'c>(
    ctx: &Arc<BridgeContext>,
    stack: LuaStack,
    class: &'c ClassDescriptor,
    first: i32,
) -> BridgeResult<(&'c ConstructorDescriptor, Vec<HostValue>)> {
    let arity = arity_from(stack, first);
    let constructor =
        select_on_stack(ctx, stack, first, arity, class.constructors()).ok_or_else(|| BridgeError::NoMatchingConstructor {
            class: class.name().to_string(),
            arity,
        })?;
    trace!(target: "luabridge::dispatch", class = class.name(), arity, "constructor selected");
    let args = convert_arguments(ctx, stack, first, constructor)?;
    Ok((constructor, args))
}

/// Pick the method `name` of `class` for host-side arguments, narrowing
/// numbers to the declared parameter types
pub(crate) fn resolve_method_for_values<'c>(
    ctx: &BridgeContext,
    class: &'c ClassDescriptor,
    name: &str,
    args: &[HostValue],
    static_only: bool,
) -> BridgeResult<(&'c MethodDescriptor, Vec<HostValue>)> {
    let classes = ctx.classes();
    let coercion = ctx.options().numeric_coercion;
    let method = select(args.len(), class.methods_named(name, static_only), |i, ty| {
        check_value(&args[i], i + 1, ty, classes, coercion)
    })
    .ok_or_else(|| BridgeError::NoMatchingMember {
        class: class.name().to_string(),
        member: name.to_string(),
        arity: args.len(),
    })?;
    trace!(target: "luabridge::dispatch", class = class.name(), method = name, arity = args.len(), "method selected");

    let args = method
        .params
        .iter()
        .zip(args)
        .map(|(ty, v)| match v.as_f64() {
            Some(n) if v.is_number() && ty.is_numeric() => narrow_number(n, ty).unwrap_or_else(|| v.clone()),
            _ => v.clone(),
        })
        .collect();
    Ok((method, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ClassRegistry, HostObject};
    use crate::options::BridgeOptions;
    use crate::registry::ContextRegistry;

    fn context(coercion: NumericCoercion) -> Arc<BridgeContext> {
        BridgeContext::create(
            &ContextRegistry::new(),
            Arc::new(ClassRegistry::new()),
            BridgeOptions::default().with_numeric_coercion(coercion),
        )
        .unwrap()
    }

    fn overloaded() -> Arc<ClassDescriptor> {
        ClassDescriptor::builder("Calc")
            .method("f", vec![HostType::I32], HostType::Str, |_, _| Ok("int".into()))
            .method("f", vec![HostType::Str], HostType::Str, |_, _| Ok("string".into()))
            .method("g", vec![HostType::Any], HostType::Str, |_, _| Ok("any".into()))
            .method("g", vec![HostType::Str], HostType::Str, |_, _| Ok("string".into()))
            .method("h", vec![HostType::Str], HostType::Str, |_, _| Ok("first".into()))
            .method("h", vec![HostType::Bytes], HostType::Str, |_, _| Ok("second".into()))
            .build()
    }

    fn pick(ctx: &Arc<BridgeContext>, name: &str, push: impl FnOnce(LuaStack)) -> BridgeResult<(String, Vec<HostValue>)> {
        let class = overloaded();
        ctx.with_frame(|stack| {
            let first = stack.top() + 1;
            push(stack);
            let (method, args) = resolve_method(ctx, stack, &class, name, first, false)?;
            Ok((format!("{:?}", method.params), args))
        })
    }

    #[test]
    fn test_overload_by_type() {
        let ctx = context(NumericCoercion::Truncate);
        let (params, args) = pick(&ctx, "f", |s| s.push_number(5.0)).unwrap();
        assert_eq!(params, "[I32]");
        assert!(matches!(args[0], HostValue::I32(5)));

        let (params, _) = pick(&ctx, "f", |s| s.push_str("x")).unwrap();
        assert_eq!(params, "[Str]");
    }

    #[test]
    fn test_exact_beats_any() {
        let ctx = context(NumericCoercion::Truncate);
        let (params, _) = pick(&ctx, "g", |s| s.push_str("x")).unwrap();
        assert_eq!(params, "[Str]");
        let (params, args) = pick(&ctx, "g", |s| s.push_boolean(true)).unwrap();
        assert_eq!(params, "[Any]");
        assert_eq!(args[0].as_bool(), Some(true));
    }

    #[test]
    fn test_ties_go_to_declaration_order() {
        let ctx = context(NumericCoercion::Truncate);
        let (params, _) = pick(&ctx, "h", |s| s.push_str("x")).unwrap();
        assert_eq!(params, "[Str]");
        // invalid UTF-8 only fits the binary overload
        let (params, _) = pick(&ctx, "h", |s| s.push_bytes(&[0xff])).unwrap();
        assert_eq!(params, "[Bytes]");
    }

    #[test]
    fn test_no_match_reports_arity() {
        let ctx = context(NumericCoercion::Truncate);
        let err = pick(&ctx, "f", |s| s.push_boolean(true)).unwrap_err();
        assert!(matches!(err, BridgeError::NoMatchingMember { arity: 1, .. }));
        let err = pick(&ctx, "f", |_| {}).unwrap_err();
        assert!(matches!(err, BridgeError::NoMatchingMember { arity: 0, .. }));
    }

    #[test]
    fn test_truncation_is_default() {
        let ctx = context(NumericCoercion::Truncate);
        let (_, args) = pick(&ctx, "f", |s| s.push_number(2.9)).unwrap();
        assert!(matches!(args[0], HostValue::I32(2)));
    }

    #[test]
    fn test_strict_rejects_fraction() {
        let ctx = context(NumericCoercion::Strict);
        assert!(pick(&ctx, "f", |s| s.push_number(2.5)).is_err());
        assert!(pick(&ctx, "f", |s| s.push_number(2.0)).is_ok());
    }

    #[test]
    fn test_check_argument_reports_position() {
        let ctx = context(NumericCoercion::Truncate);
        let err = ctx
            .with_frame(|stack| {
                stack.push_boolean(true);
                check_argument(stack, -1, 3, &HostType::I32, &ClassRegistry::new(), NumericCoercion::Truncate)
            })
            .unwrap_err();
        match err {
            BridgeError::InvalidParameter { position, expected, found } => {
                assert_eq!(position, 3);
                assert_eq!(expected, "i32");
                assert_eq!(found, "boolean");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nil_fits_reference_types_only() {
        let ctx = context(NumericCoercion::Truncate);
        let classes = ClassRegistry::new();
        let check = |stack: LuaStack, ty: HostType| {
            check_argument(stack, -1, 1, &ty, &classes, NumericCoercion::Truncate).ok()
        };
        let costs = ctx
            .with_frame(|stack| {
                stack.push_nil();
                Ok((check(stack, HostType::Str), check(stack, HostType::I64), check(stack, HostType::Any)))
            })
            .unwrap();
        assert_eq!(costs, (Some(NIL_TO_REFERENCE), None, Some(ANY)));
    }

    #[test]
    fn test_host_object_assignability() {
        let ctx = context(NumericCoercion::Truncate);
        let mut classes = ClassRegistry::new();
        classes.register_class(ClassDescriptor::builder("Shape").implements("Drawable").build());
        let circle = HostObject::new(ClassDescriptor::builder("Circle").implements("Shape").build(), ());
        let check = |stack: LuaStack, ty: HostType| {
            check_argument(stack, -1, 1, &ty, &classes, NumericCoercion::Truncate).is_ok()
        };
        let fits = ctx
            .with_frame(|stack| {
                marshal::push_value(&ctx, stack, &HostValue::Object(circle))?;
                Ok([
                    check(stack, HostType::object("Shape")),
                    check(stack, HostType::object("Drawable")),
                    check(stack, HostType::object("Square")),
                    check(stack, HostType::Script),
                ])
            })
            .unwrap();
        assert_eq!(fits, [true, true, false, false]);
    }

    #[test]
    fn test_value_overloads_match_stack_overloads() {
        let ctx = context(NumericCoercion::Truncate);
        let class = overloaded();
        let params = |name: &str, args: &[HostValue]| {
            resolve_method_for_values(&ctx, &class, name, args, false).map(|(m, args)| (format!("{:?}", m.params), args))
        };

        // `g(Any)` is declared first but an exact fit still wins
        assert_eq!(params("g", &["x".into()]).unwrap().0, "[Str]");
        assert_eq!(pick(&ctx, "g", |s| s.push_str("x")).unwrap().0, "[Str]");
        assert_eq!(params("g", &[HostValue::Bool(true)]).unwrap().0, "[Any]");

        let (params_f, args) = params("f", &[HostValue::F64(4.7)]).unwrap();
        assert_eq!(params_f, "[I32]");
        assert!(matches!(args[0], HostValue::I32(4)));
        assert_eq!(params("h", &["x".into()]).unwrap().0, "[Str]");
        assert!(matches!(
            params("f", &[HostValue::Bool(true)]),
            Err(BridgeError::NoMatchingMember { arity: 1, .. })
        ));
    }

    #[test]
    fn test_check_value_costs() {
        let classes = ClassRegistry::new();
        let cost = |v: HostValue, ty: HostType| check_value(&v, 1, &ty, &classes, NumericCoercion::Strict);
        assert_eq!(cost(HostValue::I32(1), HostType::I64).unwrap(), EXACT);
        assert_eq!(cost(HostValue::Null, HostType::Str).unwrap(), NIL_TO_REFERENCE);
        assert_eq!(cost("x".into(), HostType::Any).unwrap(), ANY);
        assert!(cost(HostValue::F64(0.5), HostType::I32).is_err());
        match cost(HostValue::Bool(true), HostType::Str) {
            Err(BridgeError::InvalidParameter { position, expected, found }) => {
                assert_eq!((position, expected.as_str(), found.as_str()), (1, "string", "bool"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_strict_number_ranges() {
        assert!(number_fits(127.0, &HostType::I8, NumericCoercion::Strict));
        assert!(!number_fits(128.0, &HostType::I8, NumericCoercion::Strict));
        assert!(!number_fits(9.3e18, &HostType::I64, NumericCoercion::Strict));
        assert!(!number_fits(1e300, &HostType::F32, NumericCoercion::Strict));
        assert!(number_fits(1e300, &HostType::F64, NumericCoercion::Strict));
        assert!(number_fits(1e300, &HostType::I8, NumericCoercion::Truncate));
        assert!(matches!(narrow_number(1e300, &HostType::I8), Some(HostValue::I8(127))));
        assert!(coerce_number(0.5, &HostType::I32, NumericCoercion::Strict).is_none());
    }
}
