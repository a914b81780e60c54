use crate::error::OperationError;
use crate::validate::ValidatedOperation;
use async_trait::async_trait;
use fb_common::FileCache;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Per-invocation context handed to an operation handler.
///
/// Handlers must honor the cancellation signal promptly, may use the
/// cache opportunistically, and must not retain file handles across
/// invocations.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub root: PathBuf,
    cancel: watch::Receiver<bool>,
    pub cache: Option<Arc<FileCache>>,
}

impl HandlerContext {
    pub fn new(
        root: PathBuf,
        cancel: watch::Receiver<bool>,
        cache: Option<Arc<FileCache>>,
    ) -> Self {
        Self { root, cancel, cache }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolve a request-relative path against the project root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, OperationError> {
        fb_common::resolve_within_root(&self.root, relative)
            .map_err(OperationError::Handler)
    }
}

/// The per-operation-type collaborator the engine drives. Concrete
/// implementations (text edit application, AST search, template
/// rendering, check execution) live outside this crate.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn run(
        &self,
        operation: &ValidatedOperation,
        ctx: &HandlerContext,
    ) -> Result<Value, OperationError>;
}

/// Handler lookup by operation type name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: &'static str,
        handler: Arc<dyn OperationHandler>,
    ) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
