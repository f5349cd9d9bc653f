//! Hook-points on the controller's read and write paths.
//!
//! A hook participates only where its `uses_*` predicates say so, and
//! only for records inside its query's scope. Post-get and pre-put hooks
//! may substitute the record they are handed; the first hook error
//! short-circuits the operation.

use std::sync::Arc;

use async_trait::async_trait;
use rampart_core::{Query, Record};

use crate::controller::Controller;
use crate::error::Error;

/// A hook on a database's read/write paths.
///
/// All methods have no-op defaults; implement the `uses_*` predicates for
/// the phases the hook participates in.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// Whether this hook wants the pre-get phase.
    fn uses_pre_get(&self) -> bool {
        false
    }

    /// Runs before the engine fetch. An error aborts the get.
    async fn pre_get(&self, db_key: &str) -> Result<(), Error> {
        let _ = db_key;
        Ok(())
    }

    /// Whether this hook wants the post-get phase.
    fn uses_post_get(&self) -> bool {
        false
    }

    /// Runs after the engine fetch; may substitute the record.
    async fn post_get(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
        Ok(record)
    }

    /// Whether this hook wants the pre-put phase.
    fn uses_pre_put(&self) -> bool {
        false
    }

    /// Runs before the engine store; may substitute the record.
    async fn pre_put(&self, record: Arc<dyn Record>) -> Result<Arc<dyn Record>, Error> {
        Ok(record)
    }
}

/// A hook bound to a controller, scoped by a query.
pub(crate) struct RegisteredHook {
    pub(crate) id: u64,
    pub(crate) q: Query,
    pub(crate) hook: Arc<dyn Hook>,
}

/// Keeps a registered hook alive; cancelling removes it from the
/// controller.
pub struct HookHandle {
    controller: Arc<Controller>,
    id: u64,
}

impl HookHandle {
    pub(crate) fn new(controller: Arc<Controller>, id: u64) -> Self {
        Self { controller, id }
    }

    /// Removes the hook from its controller.
    pub fn cancel(self) {
        self.controller.remove_hook(self.id);
    }
}
