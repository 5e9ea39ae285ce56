//! Batch call elements
//!
//! A batch groups several calls into one round trip. Each element keeps
//! its own result slot and its own error slot: the server rejecting one
//! element (an unknown method, say) leaves its siblings untouched, and
//! results always come back in input order because matching is by id.

use muxrpc_core::{Error, Id, Response, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One call inside a batch
///
/// Build elements with [`BatchElem::new`], pass the slice to
/// `Client::batch_call`, then read each element's outcome through
/// [`BatchElem::result`] or inspect the `error` slot directly.
#[derive(Debug)]
pub struct BatchElem {
    /// Remote method name
    pub method: String,
    /// Positional arguments
    pub params: Option<Value>,
    /// Raw result, filled on success
    pub result: Option<Value>,
    /// Per-element failure, filled when the server rejected this one call
    pub error: Option<Error>,
}

impl BatchElem {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            result: None,
            error: None,
        }
    }

    /// Decode this element's result into a concrete type.
    ///
    /// Fails with the element's own error if the server rejected it, or
    /// with [`Error::MissingBatchResponse`] if the batch has not been
    /// sent or the server never answered this id.
    pub fn result<T: DeserializeOwned>(&self) -> Result<T> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let value = self
            .result
            .as_ref()
            .ok_or(Error::MissingBatchResponse)?;
        serde_json::from_value(value.clone()).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Distribute a batch response array onto its elements, in input order.
///
/// `ids[k]` is the id that was assigned to `elems[k]`. A single unmatched
/// error response rejects the whole batch; elements the server skipped
/// get [`Error::MissingBatchResponse`].
pub(crate) fn fill_batch(elems: &mut [BatchElem], ids: &[Id], responses: Vec<Response>) {
    // A lone error response whose id matches nothing is a top-level
    // rejection of the entire batch.
    if responses.len() == 1
        && responses[0].error.is_some()
        && !ids.iter().any(|id| *id == responses[0].id)
    {
        let err = Error::Rpc(responses[0].error.clone().unwrap());
        for elem in elems.iter_mut() {
            elem.error = Some(err.clone());
        }
        return;
    }

    let mut by_key: std::collections::HashMap<String, Response> = responses
        .into_iter()
        .map(|r| (r.id.key(), r))
        .collect();

    for (elem, id) in elems.iter_mut().zip(ids) {
        match by_key.remove(&id.key()) {
            Some(resp) => {
                if let Some(err) = resp.error {
                    elem.error = Some(Error::Rpc(err));
                } else {
                    elem.result = Some(resp.result.unwrap_or(Value::Null));
                }
            }
            None => elem.error = Some(Error::MissingBatchResponse),
        }
    }
}
