mod transaction;
pub(crate) use transaction::*;

mod params;
pub(crate) use params::{ActionParams, alpaca_params};

mod response;
use response::Envelope;

use crate::config::Endpoint;
use crate::errors::TransportError;
use crate::params::ASCOMValue;
use crate::{Error, Result};
use mime::Mime;
use reqwest::{RequestBuilder, StatusCode};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;
use tracing::Instrument;

/// Stateless HTTP helper for a single Alpaca device endpoint.
///
/// The underlying [`reqwest::Client`] keeps connections alive between calls,
/// but nothing else is remembered from one request to the next.
#[derive(Debug, Clone)]
pub struct AlpacaClient {
    inner: reqwest::Client,
    endpoint: Endpoint,
    client_id: u32,
    timeout: Duration,
}

impl AlpacaClient {
    /// Default timeout for requests.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a client for the given endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Create a client reusing an existing HTTP session.
    pub fn with_client(inner: reqwest::Client, endpoint: Endpoint) -> Self {
        Self {
            inner,
            endpoint,
            client_id: rand::random(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Override the GET timeout and the default PUT timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint this client talks to.
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Read a property.
    pub async fn get<T: ASCOMValue>(&self, name: &str) -> Result<T> {
        let value = self
            .request(name, ActionParams::Get(alpaca_params! {}), self.timeout)
            .await?
            .ok_or_else(|| Error::Connection {
                path: name.to_owned(),
                source: TransportError::MissingValue,
            })?;

        T::from_value(&value).ok_or_else(|| Error::InvalidValue {
            name: name.to_owned(),
            value,
        })
    }

    /// Set a property or call a method with the default timeout.
    pub async fn put(&self, name: &str, params: impl Debug + Serialize + Send) -> Result {
        self.put_with_timeout(name, self.timeout, params).await
    }

    /// Set a property or call a method, waiting at most `timeout` for the reply.
    pub async fn put_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
        params: impl Debug + Serialize + Send,
    ) -> Result {
        let _ = self
            .request(name, ActionParams::Put(params), timeout)
            .await?;
        Ok(())
    }

    async fn request(
        &self,
        name: &str,
        params: ActionParams<impl Debug + Serialize + Send>,
        timeout: Duration,
    ) -> Result<Option<Value>> {
        let request_transaction = RequestTransaction::new(self.client_id);

        let span = tracing::debug_span!(
            "Alpaca transaction",
            path = name,
            ?params,
            client_transaction_id = request_transaction.client_transaction_id,
            client_id = request_transaction.client_id,
        );

        async move {
            let envelope = self
                .send(name, request_transaction, params, timeout)
                .await
                .map_err(|source| {
                    tracing::debug!(%source, "Alpaca request failed");
                    Error::Connection {
                        path: name.to_owned(),
                        source,
                    }
                })?;

            tracing::debug!(
                server_transaction_id = envelope.transaction.server_transaction_id,
                "Received response",
            );

            match envelope.transaction.client_transaction_id {
                Some(received_client_transaction_id)
                    if received_client_transaction_id
                        != request_transaction.client_transaction_id =>
                {
                    tracing::warn!(
                        sent = request_transaction.client_transaction_id,
                        received = received_client_transaction_id,
                        "ClientTransactionID mismatch",
                    );
                }
                _ => {}
            }

            envelope.into_result().map_err(|err| {
                tracing::debug!(%err, "Alpaca device returned an error");
                Error::Device(err)
            })
        }
        .instrument(span)
        .await
    }

    async fn send(
        &self,
        name: &str,
        transaction: RequestTransaction,
        params: ActionParams<impl Debug + Serialize + Send>,
        timeout: Duration,
    ) -> Result<Envelope, TransportError> {
        let mut request = self
            .inner
            .request(
                match params {
                    ActionParams::Get(_) => reqwest::Method::GET,
                    ActionParams::Put(_) => reqwest::Method::PUT,
                },
                self.endpoint.url(name),
            )
            .timeout(timeout);

        let add_params = match params {
            ActionParams::Get(_) => RequestBuilder::query,
            ActionParams::Put(_) => RequestBuilder::form,
        };
        request = add_params(
            request,
            &RequestWithTransaction {
                transaction,
                params,
            },
        );

        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(TransportError::Status(response.status()));
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok());
        let bytes = response.bytes().await?;

        Envelope::parse(mime_type, &bytes)
    }
}
