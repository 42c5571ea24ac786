//! Host functions callable from script code

use std::fmt;
use std::sync::Arc;

use crate::context::BridgeContext;
use crate::error::BridgeResult;
use crate::host::{CallScope, HostValue};

/// Body of a host function: marshalled arguments in, results out
pub type HostFn = dyn Fn(&CallScope<'_>, &[HostValue]) -> anyhow::Result<Vec<HostValue>> + Send + Sync;

/// A named host closure. Pushed into the engine it becomes a callable
/// userdata; calling it runs the closure under the context lock.
#[derive(Clone)]
pub struct HostFunction {
    name: Arc<str>,
    body: Arc<HostFn>,
}

impl HostFunction {
    /// Wrap a closure
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&CallScope<'_>, &[HostValue]) -> anyhow::Result<Vec<HostValue>> + Send + Sync + 'static,
    {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            body: Arc::new(body),
        }
    }

    /// Name the function is registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the body
    pub fn call(&self, scope: &CallScope<'_>, args: &[HostValue]) -> anyhow::Result<Vec<HostValue>> {
        (self.body)(scope, args)
    }

    /// Bind as a global of `ctx` under [`HostFunction::name`]
    pub fn register(&self, ctx: &Arc<BridgeContext>) -> BridgeResult<()> {
        ctx.register_function(self.clone())
    }

    /// Same closure
    pub fn ptr_eq(&self, other: &HostFunction) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::host::ClassRegistry;
    use crate::options::BridgeOptions;
    use crate::registry::ContextRegistry;

    fn context() -> Arc<BridgeContext> {
        BridgeContext::create(&ContextRegistry::new(), Arc::new(ClassRegistry::new()), BridgeOptions::default())
            .unwrap()
    }

    #[test]
    fn test_register_and_call_from_script() {
        let ctx = context();
        HostFunction::new("sum", |_, args| {
            Ok(vec![HostValue::F64(args.iter().filter_map(HostValue::as_f64).sum())])
        })
        .register(&ctx)
        .unwrap();

        let values = ctx.exec("return sum(1, 2, 3.5)").unwrap();
        assert_eq!(values[0].as_f64(), Some(6.5));
    }

    #[test]
    fn test_multiple_results() {
        let ctx = context();
        HostFunction::new("split", |_, args| {
            let text = args.first().and_then(HostValue::as_str).unwrap_or_default().to_string();
            Ok(text.split(',').map(HostValue::from).collect())
        })
        .register(&ctx)
        .unwrap();

        let values = ctx.exec("local a, b, c = split('x,y,z') return c, b, a").unwrap();
        let texts: Vec<_> = values.iter().filter_map(HostValue::as_str).collect();
        assert_eq!(texts, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_error_becomes_script_error() {
        let ctx = context();
        HostFunction::new("fail", |_, _| Err(anyhow::anyhow!("nope")))
            .register(&ctx)
            .unwrap();

        let err = ctx.exec("fail()").unwrap_err();
        assert!(matches!(err, BridgeError::Engine { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_identity() {
        let f = HostFunction::new("f", |_, _| Ok(vec![]));
        let g = HostFunction::new("f", |_, _| Ok(vec![]));
        assert!(f.ptr_eq(&f.clone()));
        assert!(!f.ptr_eq(&g));
    }
}
