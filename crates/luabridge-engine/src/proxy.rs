//! Script-backed implementations of host interfaces
//!
//! `create_proxy` turns a script table into a host object whose synthesized
//! class is assignable to every requested interface. Each interface method
//! looks its name up in the table (honoring `__index`) and calls it with the
//! proxy itself as the first argument; a missing entry yields `Null`.

use std::sync::Arc;

use anyhow::anyhow;
use luabridge_stack::ValueKind;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{call_function, ReferenceHandle};
use crate::host::{CallScope, ClassDescriptor, HostObject, HostType, HostValue, InterfaceDescriptor, MethodDescriptor};
use crate::resolve;

/// Payload of a proxy host object
pub struct ScriptProxy {
    table: ReferenceHandle,
    interfaces: Vec<Arc<InterfaceDescriptor>>,
}

impl ScriptProxy {
    /// Backing table
    pub fn table(&self) -> &ReferenceHandle {
        &self.table
    }

    /// Implemented interfaces, in the order requested
    pub fn interfaces(&self) -> &[Arc<InterfaceDescriptor>] {
        &self.interfaces
    }

    /// Dispatch `name` into the backing table.
    ///
    /// `this` is passed to the script function as its first argument.
    pub fn invoke(&self, this: &HostObject, name: &str, args: &[HostValue], returns: &HostType) -> BridgeResult<HostValue> {
        let ctx = self.table.context();
        ctx.with_frame(|stack| {
            self.table.push(ctx, stack)?;
            stack.push_str(name);
            stack.get_table(-2)?;
            if stack.is_nil(-1) {
                trace!(target: "luabridge::proxy", method = name, "no script implementation, returning null");
                return Ok(HostValue::Null);
            }

            let mut call_args = Vec::with_capacity(args.len() + 1);
            call_args.push(HostValue::Object(this.clone()));
            call_args.extend_from_slice(args);

            let nresults = if *returns == HostType::Void { 0 } else { 1 };
            let result = call_function(ctx, stack, &call_args, Some(nresults))?
                .pop()
                .unwrap_or(HostValue::Null);
            coerce_result(ctx, result, returns)
        })
    }
}

fn coerce_result(ctx: &BridgeContext, result: HostValue, returns: &HostType) -> BridgeResult<HostValue> {
    match result.as_f64() {
        Some(n) if returns.is_numeric() => resolve::coerce_number(n, returns, ctx.options().numeric_coercion)
            .ok_or_else(|| BridgeError::InvalidParameter {
                position: 0,
                expected: returns.to_string(),
                found: n.to_string(),
            }),
        _ => Ok(result),
    }
}

fn proxy_method(name: &str, params: &[HostType], returns: &HostType) -> MethodDescriptor {
    let method = name.to_string();
    let declared = returns.clone();
    MethodDescriptor {
        name: name.to_string(),
        params: params.to_vec(),
        returns: returns.clone(),
        is_static: false,
        invoker: Arc::new(move |scope: &CallScope<'_>, args: &[HostValue]| {
            let this = scope
                .receiver()
                .ok_or_else(|| anyhow!("proxy method `{}` called without a receiver", method))?;
            let proxy = this
                .downcast_ref::<ScriptProxy>()
                .ok_or_else(|| anyhow!("`{}` is not a script proxy", this))?;
            Ok(proxy.invoke(this, &method, args, &declared)?)
        }),
    }
}

/// Class whose methods are the union of the interfaces' methods; the first
/// declaration of a name and arity wins
fn proxy_class(interfaces: &[Arc<InterfaceDescriptor>]) -> Arc<ClassDescriptor> {
    let names: Vec<&str> = interfaces.iter().map(|i| i.name()).collect();
    let mut builder = ClassDescriptor::builder(format!("$Proxy[{}]", names.join(", ")));
    let mut seen: FxHashSet<(&str, usize)> = FxHashSet::default();

    for interface in interfaces {
        builder = builder.implements(interface.name());
        for signature in interface.methods() {
            if seen.insert((signature.name.as_str(), signature.params.len())) {
                builder = builder.method_descriptor(proxy_method(&signature.name, &signature.params, &signature.returns));
            }
        }
    }
    builder.build()
}

/// Host object implementing `interfaces` by dispatching into `table`
pub(crate) fn create_proxy(
    ctx: &Arc<BridgeContext>,
    table: &ReferenceHandle,
    interfaces: &[&str],
) -> BridgeResult<HostObject> {
    if !Arc::ptr_eq(table.context(), ctx) {
        return Err(BridgeError::CrossContext);
    }
    match table.kind()? {
        ValueKind::Table => {}
        other => return Err(BridgeError::NotIndexable(other.name().to_string())),
    }

    let resolved = interfaces
        .iter()
        .map(|name| ctx.classes().interface(name.trim()))
        .collect::<BridgeResult<Vec<_>>>()?;
    let class = proxy_class(&resolved);
    debug!(target: "luabridge::proxy", ctx = ctx.id(), class = class.name(), "proxy created");

    Ok(HostObject::new(
        class,
        ScriptProxy {
            table: table.clone(),
            interfaces: resolved,
        },
    ))
}
