//! Registered handlers and their transportable form.
//!
//! Compiled code cannot be shipped to a worker, so a callable travels as a
//! descriptor naming a handler that both sides have registered. The
//! descriptor carries a fingerprint so a worker built from a different
//! revision of the handler refuses to run it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{InvocationError, Result};

/// Name every reconstructed callable is labeled with.
pub const SYNTHETIC_NAME: &str = "remote";

/// Descriptor format understood by this build.
pub const DESCRIPTOR_FORMAT: u32 = 1;

const MAX_NAME_LEN: usize = 128;

type HandlerFn = dyn Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync;

/// A function that can be invoked by name with positional JSON arguments.
#[derive(Clone)]
pub struct Handler {
    name: String,
    arity: usize,
    revision: String,
    body: Arc<HandlerFn>,
}

impl Handler {
    /// Create a handler from a closure over positional arguments.
    pub fn new<F>(name: impl Into<String>, arity: usize, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            revision: "1".to_string(),
            body: Arc::new(body),
        }
    }

    /// Create a handler whose arguments deserialize into the tuple `A`.
    ///
    /// `arity` must match the length of `A`; a mismatch is only caught when
    /// the handler runs, as a "bad arguments" error. Zero-argument handlers
    /// take `()`.
    ///
    /// ```
    /// use remotefn::Handler;
    ///
    /// let add = Handler::typed("add", 2, |(a, b): (i64, i64)| a + b);
    /// assert_eq!(add.arity(), 2);
    /// ```
    pub fn typed<A, R, F>(name: impl Into<String>, arity: usize, body: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self::new(name, arity, move |args| {
            let args = if args.is_empty() {
                Value::Null
            } else {
                Value::Array(args)
            };
            let args: A = serde_json::from_value(args)
                .map_err(|e| format!("bad arguments: {}", e))?;
            serde_json::to_value(body(args)).map_err(|e| format!("bad result: {}", e))
        })
    }

    /// Builder method to set the revision folded into the fingerprint.
    ///
    /// Bump it whenever the handler's behavior changes so stale workers are
    /// detected instead of silently running old logic.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Content digest of (name, arity, revision), hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update((self.arity as u64).to_le_bytes());
        hasher.update([0u8]);
        hasher.update(self.revision.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Invoke the handler positionally.
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        if args.len() != self.arity {
            return Err(InvocationError::Deserialization(format!(
                "handler '{}' takes {} argument(s), got {}",
                self.name,
                self.arity,
                args.len()
            )));
        }
        (self.body)(args).map_err(|message| InvocationError::Handler {
            name: self.name.clone(),
            message,
        })
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

/// The namespace callables are resolved against.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Names must be unique and filesystem-safe, since
    /// the name doubles as the staged callable's file name.
    pub fn register(&mut self, handler: Handler) -> Result<()> {
        validate_name(handler.name())?;
        if self.handlers.contains_key(handler.name()) {
            return Err(InvocationError::Registration(format!(
                "handler '{}' is already registered",
                handler.name()
            )));
        }
        self.handlers.insert(handler.name.clone(), handler);
        Ok(())
    }

    /// Builder method to register a handler.
    pub fn with_handler(mut self, handler: Handler) -> Result<Self> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Names the staging area uses for its own files.
fn is_reserved(name: &str) -> bool {
    name == "out"
        || name
            .strip_prefix("arg")
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !is_reserved(name)
        && !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(InvocationError::Registration(format!(
            "invalid handler name '{}'",
            name
        )))
    }
}

/// Transportable form of a callable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableDescriptor {
    pub format: u32,
    pub name: String,
    pub arity: usize,
    pub fingerprint: String,
}

/// Serialize a handler into an inert blob.
pub fn serialize(handler: &Handler) -> Result<Vec<u8>> {
    let descriptor = CallableDescriptor {
        format: DESCRIPTOR_FORMAT,
        name: handler.name().to_string(),
        arity: handler.arity(),
        fingerprint: handler.fingerprint(),
    };
    serde_json::to_vec(&descriptor).map_err(|e| InvocationError::Serialization(e.to_string()))
}

/// Reconstruct a callable from its blob, bound to `namespace`.
///
/// Only the blob itself is checked here. Whether the namespace can actually
/// run it is discovered when the callable is invoked.
pub fn deserialize(bytes: &[u8], namespace: Arc<Registry>) -> Result<ResolvedCallable> {
    let descriptor: CallableDescriptor = serde_json::from_slice(bytes)
        .map_err(|e| InvocationError::Deserialization(format!("corrupt callable blob: {}", e)))?;
    if descriptor.format != DESCRIPTOR_FORMAT {
        return Err(InvocationError::Deserialization(format!(
            "unsupported callable format {} (expected {})",
            descriptor.format, DESCRIPTOR_FORMAT
        )));
    }
    Ok(ResolvedCallable {
        descriptor,
        namespace,
    })
}

/// A callable reconstructed from a blob.
#[derive(Debug, Clone)]
pub struct ResolvedCallable {
    descriptor: CallableDescriptor,
    namespace: Arc<Registry>,
}

impl ResolvedCallable {
    /// Label of the reconstructed callable, always [`SYNTHETIC_NAME`].
    pub fn name(&self) -> &'static str {
        SYNTHETIC_NAME
    }

    /// Handler the blob refers to.
    pub fn target(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CallableDescriptor {
        &self.descriptor
    }

    /// Resolve the handler in the bound namespace and invoke it.
    pub fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        let handler = self.namespace.get(&self.descriptor.name).ok_or_else(|| {
            InvocationError::Deserialization(format!(
                "handler '{}' is not registered in this namespace",
                self.descriptor.name
            ))
        })?;
        if handler.fingerprint() != self.descriptor.fingerprint {
            return Err(InvocationError::Deserialization(format!(
                "handler '{}' fingerprint mismatch: blob {}, namespace {}",
                self.descriptor.name,
                self.descriptor.fingerprint,
                handler.fingerprint()
            )));
        }
        handler.call(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add() -> Handler {
        Handler::typed("add", 2, |(a, b): (i64, i64)| a + b)
    }

    fn namespace() -> Arc<Registry> {
        Arc::new(Registry::new().with_handler(add()).unwrap())
    }

    #[test]
    fn test_round_trip_invokes_same_logic() {
        let blob = serialize(&add()).unwrap();
        let callable = deserialize(&blob, namespace()).unwrap();
        assert_eq!(callable.name(), SYNTHETIC_NAME);
        assert_eq!(callable.target(), "add");
        assert_eq!(callable.invoke(vec![json!(2), json!(3)]).unwrap(), json!(5));
    }

    #[test]
    fn test_serializing_twice_behaves_identically() {
        let first = deserialize(&serialize(&add()).unwrap(), namespace()).unwrap();
        let second = deserialize(&serialize(&add()).unwrap(), namespace()).unwrap();
        for (a, b) in [(0, 0), (-4, 9), (1_i64 << 40, 1)] {
            let args = vec![json!(a), json!(b)];
            assert_eq!(
                first.invoke(args.clone()).unwrap(),
                second.invoke(args).unwrap()
            );
        }
    }

    #[test]
    fn test_unknown_handler_fails_at_call_time() {
        let blob = serialize(&Handler::typed("missing", 0, |(): ()| 1)).unwrap();
        let callable = deserialize(&blob, namespace()).expect("blob itself is valid");
        let err = callable.invoke(vec![]).unwrap_err();
        assert!(matches!(err, InvocationError::Deserialization(_)));
    }

    #[test]
    fn test_revision_mismatch_is_rejected() {
        let blob = serialize(&add().with_revision("2")).unwrap();
        let callable = deserialize(&blob, namespace()).unwrap();
        let err = callable.invoke(vec![json!(1), json!(1)]).unwrap_err();
        assert!(err.to_string().contains("fingerprint mismatch"));
    }

    #[test]
    fn test_corrupt_and_future_blobs() {
        let err = deserialize(b"\x00\x01garbage", namespace()).unwrap_err();
        assert!(matches!(err, InvocationError::Deserialization(_)));

        let future = json!({"format": 99, "name": "add", "arity": 2, "fingerprint": "x"});
        let err = deserialize(future.to_string().as_bytes(), namespace()).unwrap_err();
        assert!(err.to_string().contains("unsupported callable format"));
    }

    #[test]
    fn test_arity_checked() {
        let err = add().call(vec![json!(1)]).unwrap_err();
        assert!(matches!(err, InvocationError::Deserialization(_)));
    }

    #[test]
    fn test_handler_error_surfaces() {
        let div = Handler::new("div", 2, |args| {
            let (a, b) = (args[0].as_f64(), args[1].as_f64());
            match (a, b) {
                (Some(_), Some(b)) if b == 0.0 => Err("division by zero".to_string()),
                (Some(a), Some(b)) => Ok(json!(a / b)),
                _ => Err("expected numbers".to_string()),
            }
        });
        let err = div.call(vec![json!(1), json!(0)]).unwrap_err();
        assert_eq!(err.to_string(), "Handler 'div' failed: division by zero");
    }

    #[test]
    fn test_zero_arity_typed_handler() {
        let answer = Handler::typed("answer", 0, |(): ()| 42);
        assert_eq!(answer.call(vec![]).unwrap(), json!(42));

        let registry = Arc::new(Registry::new().with_handler(answer.clone()).unwrap());
        let callable = deserialize(&serialize(&answer).unwrap(), registry).unwrap();
        assert_eq!(callable.invoke(vec![]).unwrap(), json!(42));
    }

    #[test]
    fn test_typed_arity_disagreeing_with_tuple() {
        let pair = Handler::typed("pair", 3, |(a, b): (i64, i64)| a + b);
        let err = pair.call(vec![json!(1), json!(2), json!(3)]).unwrap_err();
        assert!(err.to_string().contains("bad arguments"));
    }

    #[test]
    fn test_registration_rules() {
        let mut registry = Registry::new();
        registry.register(add()).unwrap();
        assert!(registry.register(add()).is_err());
        for bad in ["", "..", "a/b", "spaced name", "out", "arg0", "arg12"] {
            assert!(registry.register(Handler::typed(bad, 0, |(): ()| 0)).is_err());
        }
        registry.register(Handler::typed("argmax", 1, |(v,): (Vec<i64>,)| v.into_iter().max())).unwrap();
        assert_eq!(registry.names(), vec!["add", "argmax"]);
    }
}
