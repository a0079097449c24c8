//! # Lifecycle Hooks
//!
//! Host-supplied checks that run before each storage operation. A hook
//! may rewrite the payload in place or veto the operation by returning an
//! error, in which case the adapter is never called and the error goes to
//! the error sink.
//!
//! Plain closures `Fn(&str, &mut P, &RequestContext) -> ODataResult<()>`
//! are hooks; anything that needs to await implements [`Hook`] directly.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::context::RequestContext;
use crate::errors::ODataResult;
use crate::query::QueryOptions;

/// Hook over a payload of type `P`
#[async_trait]
pub trait Hook<P: Send + Sync>: Send + Sync {
    async fn call(&self, collection: &str, payload: &mut P, req: &RequestContext)
        -> ODataResult<()>;
}

#[async_trait]
impl<P, F> Hook<P> for F
where
    P: Send + Sync,
    F: Fn(&str, &mut P, &RequestContext) -> ODataResult<()> + Send + Sync,
{
    async fn call(
        &self,
        collection: &str,
        payload: &mut P,
        req: &RequestContext,
    ) -> ODataResult<()> {
        self(collection, payload, req)
    }
}

/// Payload of the update hook
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    /// `{"_id": <id>}`
    pub filter: Value,

    /// `{"$set": <partial document>}`
    pub update: Value,
}

pub type AfterReadFn = Arc<dyn Fn(&str, &RequestContext) + Send + Sync>;

fn pass<P>(_collection: &str, _payload: &mut P, _req: &RequestContext) -> ODataResult<()> {
    Ok(())
}

fn deprecated(slot: &str) {
    warn!(
        hook = slot,
        "DEPRECATED: hook registered without the request parameter"
    );
}

/// Hook slots, each defaulting to a pass-through
#[derive(Clone)]
pub struct Hooks {
    pub(crate) before_query: Arc<dyn Hook<QueryOptions>>,
    pub(crate) before_insert: Arc<dyn Hook<Value>>,
    pub(crate) before_update: Arc<dyn Hook<UpdateCommand>>,
    pub(crate) before_remove: Arc<dyn Hook<Value>>,
    pub(crate) after_read: AfterReadFn,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            before_query: Arc::new(pass::<QueryOptions>),
            before_insert: Arc::new(pass::<Value>),
            before_update: Arc::new(pass::<UpdateCommand>),
            before_remove: Arc::new(pass::<Value>),
            after_read: Arc::new(|_: &str, _: &RequestContext| {}),
        }
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_query(mut self, hook: impl Hook<QueryOptions> + 'static) -> Self {
        self.before_query = Arc::new(hook);
        self
    }

    pub fn before_insert(mut self, hook: impl Hook<Value> + 'static) -> Self {
        self.before_insert = Arc::new(hook);
        self
    }

    pub fn before_update(mut self, hook: impl Hook<UpdateCommand> + 'static) -> Self {
        self.before_update = Arc::new(hook);
        self
    }

    pub fn before_remove(mut self, hook: impl Hook<Value> + 'static) -> Self {
        self.before_remove = Arc::new(hook);
        self
    }

    /// Notification after a successful adapter query
    pub fn after_read<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &RequestContext) + Send + Sync + 'static,
    {
        self.after_read = Arc::new(f);
        self
    }

    // ==================
    // Legacy signatures
    // ==================

    /// Register a request-less query hook
    pub fn before_query_legacy<F>(self, f: F) -> Self
    where
        F: Fn(&str, &mut QueryOptions) -> ODataResult<()> + Send + Sync + 'static,
    {
        deprecated("beforeQuery");
        self.before_query(move |c: &str, q: &mut QueryOptions, _: &RequestContext| f(c, q))
    }

    /// Register a request-less insert hook
    pub fn before_insert_legacy<F>(self, f: F) -> Self
    where
        F: Fn(&str, &mut Value) -> ODataResult<()> + Send + Sync + 'static,
    {
        deprecated("beforeInsert");
        self.before_insert(move |c: &str, doc: &mut Value, _: &RequestContext| f(c, doc))
    }

    /// Register a request-less update hook
    pub fn before_update_legacy<F>(self, f: F) -> Self
    where
        F: Fn(&str, &mut UpdateCommand) -> ODataResult<()> + Send + Sync + 'static,
    {
        deprecated("beforeUpdate");
        self.before_update(move |c: &str, cmd: &mut UpdateCommand, _: &RequestContext| f(c, cmd))
    }

    /// Register a request-less remove hook
    pub fn before_remove_legacy<F>(self, f: F) -> Self
    where
        F: Fn(&str, &mut Value) -> ODataResult<()> + Send + Sync + 'static,
    {
        deprecated("beforeRemove");
        self.before_remove(move |c: &str, filter: &mut Value, _: &RequestContext| f(c, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ODataError;
    use serde_json::json;

    #[tokio::test]
    async fn test_defaults_pass_through() {
        let hooks = Hooks::default();
        let mut doc = json!({"a": 1});
        hooks
            .before_insert
            .call("Widgets", &mut doc, &RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(doc, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_closure_hook_can_rewrite_and_veto() {
        let hooks = Hooks::new().before_insert(
            |collection: &str, doc: &mut Value, _req: &RequestContext| -> ODataResult<()> {
                if doc.get("forbidden").is_some() {
                    return Err(ODataError::hook(403, format!("not in {}", collection)));
                }
                doc["stamped"] = json!(true);
                Ok(())
            },
        );
        let ctx = RequestContext::detached();

        let mut ok = json!({});
        hooks.before_insert.call("Widgets", &mut ok, &ctx).await.unwrap();
        assert_eq!(ok["stamped"], true);

        let mut bad = json!({"forbidden": 1});
        let err = hooks.before_insert.call("Widgets", &mut bad, &ctx).await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 403);
    }

    #[tokio::test]
    async fn test_legacy_and_current_forms_behave_identically() {
        fn check(_: &str, cmd: &mut UpdateCommand) -> ODataResult<()> {
            if cmd.filter["_id"] == "locked" {
                Err(ODataError::hook(423, "locked"))
            } else {
                Ok(())
            }
        }

        let legacy = Hooks::new().before_update_legacy(check);
        let current = Hooks::new().before_update(
            |c: &str, cmd: &mut UpdateCommand, _: &RequestContext| check(c, cmd),
        );
        let ctx = RequestContext::detached();

        for id in ["open", "locked"] {
            let mut a = UpdateCommand {
                filter: json!({"_id": id}),
                update: json!({"$set": {}}),
            };
            let mut b = a.clone();
            let ra = legacy.before_update.call("Widgets", &mut a, &ctx).await;
            let rb = current.before_update.call("Widgets", &mut b, &ctx).await;
            assert_eq!(ra.is_ok(), rb.is_ok());
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn test_async_hook_impl() {
        struct Delayed;

        #[async_trait]
        impl Hook<QueryOptions> for Delayed {
            async fn call(
                &self,
                _collection: &str,
                query: &mut QueryOptions,
                _req: &RequestContext,
            ) -> ODataResult<()> {
                tokio::task::yield_now().await;
                query.top = Some(1);
                Ok(())
            }
        }

        let hooks = Hooks::new().before_query(Delayed);
        let mut query = QueryOptions::new("Widgets");
        hooks
            .before_query
            .call("Widgets", &mut query, &RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(query.top, Some(1));
    }
}
