//! Stubs for remote services.

use jamp_client::{Arg, CallOptions, RequestError};
use jamp_protocol::QueryId;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{JampClient, JampError};

/// A client bound to one service address.
///
/// Every method is a plain call by name: no proxy, no generated code.
///
/// ```rust,no_run
/// # use jamp::prelude::*;
/// # async fn demo(client: JampClient) -> Result<(), JampError> {
/// let counter = client.service("/counter");
/// counter.send("increment", vec![]).await?;
/// let value: i64 = counter.query_as("get", vec![]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ServiceRef {
    client: JampClient,
    address: String,
}

impl ServiceRef {
    pub(crate) fn new(client: JampClient, address: String) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Calls `method` and waits for its result.
    pub async fn query(&self, method: &str, args: Vec<Arg>) -> Result<Value, JampError> {
        self.client.call(&self.address, method, args).await
    }

    /// Calls `method` and deserializes its result.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<T, JampError> {
        self.client.call_as(&self.address, method, args).await
    }

    /// Calls `method`, routing the outcome to `callback`.
    pub async fn query_with(
        &self,
        method: &str,
        args: Vec<Arg>,
        callback: impl FnOnce(Result<Value, RequestError>) + Send + 'static,
    ) -> Result<QueryId, JampError> {
        self.client
            .query(&self.address, method, args, CallOptions::default(), callback)
            .await
    }

    /// Fire-and-forget call of `method`.
    pub async fn send(&self, method: &str, args: Vec<Value>) -> Result<QueryId, JampError> {
        self.client.send(&self.address, method, args).await
    }
}
