use std::ops::Deref;

use async_trait::async_trait;
use reqwest::{
    header::{CONTENT_TYPE, DATE, RANGE},
    Client, ClientBuilder,
};
use tokio::time::Instant;
use url::Url;

use super::{RequestOptions, Response, Transport, TransportError};
use crate::NagareResult;

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(builder: ClientBuilder) -> NagareResult<Self> {
        let client = builder.build().map_err(TransportError::from)?;
        Ok(Self { client })
    }
}

impl Deref for HttpTransport {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url, options: &RequestOptions) -> Result<Response, TransportError> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = &options.byte_range {
            request = request.header(RANGE, range.to_http_range());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let headers_at = Instant::now();
        let status = response.status().as_u16();
        let content_type = options.mime_type.clone().or_else(|| {
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
        let date = response
            .headers()
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        tracing::trace!(%url, status, bytes = body.len(), "Response received");

        Ok(Response {
            status,
            body,
            content_type,
            date,
            headers_at: Some(headers_at),
        })
    }
}
