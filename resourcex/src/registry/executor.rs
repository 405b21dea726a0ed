//! The executor contract: how extracted resource files are handed to an
//! external runner.
//!
//! The registry does not prescribe how execution happens: in-process,
//! sandboxed subprocess, remote microVM. It guarantees only that a handler
//! sees exactly the file bytes that were stored; the resolver verifies the
//! archive digest before dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;

use crate::core::fileset::FileSet;

/// Runs resources of one type.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Short human-readable description of what this handler does.
    fn describe(&self) -> &str;

    /// Run the resource: receives the extracted file tree and caller
    /// arguments, produces an arbitrary JSON value.
    async fn execute(&self, files: &FileSet, args: Option<&Value>) -> Result<Value>;
}

/// Dispatch table from resource type string to handler.
///
/// An explicit field of whatever owns it, never process-global state.
#[derive(Default)]
pub struct ExecutorRegistry {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        resource_type: impl Into<String>,
        handler: Arc<dyn ResourceHandler>,
    ) -> &mut Self {
        self.handlers.insert(resource_type.into(), handler);
        self
    }

    pub fn handler(&self, resource_type: &str) -> Option<&Arc<dyn ResourceHandler>> {
        self.handlers.get(resource_type)
    }

    pub async fn execute(
        &self,
        resource_type: &str,
        files: &FileSet,
        args: Option<&Value>,
    ) -> Result<Value> {
        let Some(handler) = self.handler(resource_type) else {
            bail!("no handler registered for resource type `{resource_type}`");
        };
        handler.execute(files, args).await
    }
}
