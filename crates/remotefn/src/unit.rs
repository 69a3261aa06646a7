//! The serialized bundle of one call.

/// Callable blob plus ordered argument blobs, ready for transport.
///
/// Built once per call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationUnit {
    handler: String,
    callable_blob: Vec<u8>,
    argument_blobs: Vec<Vec<u8>>,
}

impl InvocationUnit {
    pub fn new(
        handler: impl Into<String>,
        callable_blob: Vec<u8>,
        argument_blobs: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            handler: handler.into(),
            callable_blob,
            argument_blobs,
        }
    }

    /// Name of the handler the callable blob refers to.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn callable_blob(&self) -> &[u8] {
        &self.callable_blob
    }

    pub fn argument_blobs(&self) -> &[Vec<u8>] {
        &self.argument_blobs
    }

    pub fn arg_count(&self) -> usize {
        self.argument_blobs.len()
    }
}
