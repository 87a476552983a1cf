use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::{Cid, ContentStore, Error};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Basic-auth credentials attached to every outgoing request.
#[derive(Debug, Clone)]
pub struct Auth {
    pub project_id: String,
    pub project_secret: String,
}

/// A [`ContentStore`] speaking the store's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    auth: Option<Auth>,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        Self::build(base_url.into(), None)
    }

    /// Like [`HttpStore::new`], but authenticates every request with the
    /// given project credentials.
    pub fn with_auth(base_url: impl Into<String>, auth: Auth) -> Result<Self, Error> {
        Self::build(base_url.into(), Some(auth))
    }

    fn build(base_url: String, auth: Option<Auth>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(auth) = &self.auth {
            req = req.basic_auth(&auth.project_id, Some(&auth.project_secret));
        }
        req
    }
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[async_trait]
impl ContentStore for HttpStore {
    async fn put(&self, data: Bytes) -> Result<Cid, Error> {
        let size = data.len();
        let part = multipart::Part::bytes(data.to_vec()).file_name("blob");
        let form = multipart::Form::new().part("file", part);
        let resp = self
            .post("/api/v0/add")
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: AddResponse = resp.json().await?;
        if body.hash.is_empty() {
            return Err(Error::InvalidResponse(
                "add response carried no hash".to_string(),
            ));
        }
        debug!(size, cid = %body.hash, "uploaded blob");
        Ok(Cid::from(body.hash))
    }

    async fn pin(&self, cid: &Cid) -> Result<(), Error> {
        let resp = self
            .post("/api/v0/pin/add")
            .query(&[("arg", cid.as_str())])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(cid.clone()));
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn cat(&self, cid: &Cid) -> Result<Bytes, Error> {
        let resp = self
            .post("/api/v0/cat")
            .query(&[("arg", cid.as_str())])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(cid.clone()));
        }
        let resp = resp.error_for_status()?;
        Ok(resp.bytes().await?)
    }
}
