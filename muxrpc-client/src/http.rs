//! Request-per-call HTTP connection
//!
//! HTTP has no persistent connection and no server push, so there is no
//! dispatch loop here: every call is one POST with the encoded request as
//! its body and the decoded body as its response. Subscriptions are
//! rejected before any network activity by the façade.

use muxrpc_core::{codec, Error, Message, Notification, Request, Response, Result};

pub(crate) struct HttpConnection {
    url: String,
    client: reqwest::Client,
}

impl HttpConnection {
    pub(crate) fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, payload: String) -> Result<Option<String>> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("http status {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if body.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    }

    /// One call, one round trip
    pub(crate) async fn call(&self, request: &Request) -> Result<Response> {
        let body = self
            .post(codec::encode(request)?)
            .await?
            .ok_or_else(|| Error::Parse("empty response body".to_string()))?;

        match codec::decode(&body)? {
            Message::Response(resp) if resp.id == request.id => Ok(resp),
            Message::Response(resp) => Err(Error::Parse(format!(
                "response id {} does not match request id {}",
                resp.id, request.id
            ))),
            _ => Err(Error::Parse("expected a response".to_string())),
        }
    }

    /// One batch, one round trip; element matching is the caller's job
    pub(crate) async fn batch(&self, requests: &[Request]) -> Result<Vec<Response>> {
        let body = self
            .post(codec::encode_batch(requests)?)
            .await?
            .ok_or_else(|| Error::Parse("empty response body".to_string()))?;

        match codec::decode(&body)? {
            Message::Batch(values) => {
                let mut responses = Vec::with_capacity(values.len());
                for value in values {
                    match codec::decode_batch_response(value) {
                        Ok(resp) => responses.push(resp),
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping malformed batch element")
                        }
                    }
                }
                Ok(responses)
            }
            // Some servers reject a whole batch with one error response.
            Message::Response(resp) => Ok(vec![resp]),
            _ => Err(Error::Parse("expected a batch response".to_string())),
        }
    }

    /// Fire-and-forget; resolves when the POST round trip is done
    pub(crate) async fn notify(&self, notification: &Notification) -> Result<()> {
        self.post(codec::encode(notification)?).await.map(|_| ())
    }
}
