//! Request descriptors and pass-through responses

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DispatchError;
use crate::token::Token;

/// Request body
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes {
        body: Bytes,
        content_type: Option<String>,
    },
    /// multipart/form-data; the transport writes the boundary header
    Multipart(Vec<MultipartPart>),
}

/// One field of a multipart form
#[derive(Debug, Clone)]
pub enum MultipartPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        bytes: Bytes,
        mime: Option<String>,
    },
}

impl MultipartPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        MultipartPart::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
        mime: Option<String>,
    ) -> Self {
        MultipartPart::File {
            name: name.into(),
            file_name: file_name.into(),
            bytes: bytes.into(),
            mime,
        }
    }
}

impl Payload {
    pub fn is_multipart(&self) -> bool {
        matches!(self, Payload::Multipart(_))
    }

    /// Content type implied by the payload itself
    fn default_content_type(&self) -> Option<&str> {
        match self {
            Payload::Json(_) => Some("application/json"),
            Payload::Bytes { content_type, .. } => content_type.as_deref(),
            Payload::Empty | Payload::Multipart(_) => None,
        }
    }
}

/// One authenticated call: method, URL, payload and header overrides
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: String,
    payload: Payload,
    headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            payload: Payload::Empty,
            headers: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(body)?;
        Ok(self.payload(Payload::Json(value)))
    }

    pub fn multipart(self, parts: Vec<MultipartPart>) -> Self {
        self.payload(Payload::Multipart(parts))
    }

    /// Caller header; later values for the same name replace earlier ones
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn payload_ref(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn with_url(mut self, url: String) -> Self {
        self.url = url;
        self
    }

    /// Headers sent with the request: bearer auth and the payload's content
    /// type, overridden by caller headers. A multipart request never carries
    /// an explicit Content-Type.
    pub fn outgoing_headers(&self, token: &Token) -> Result<HeaderMap, DispatchError> {
        let mut headers = HeaderMap::new();

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| DispatchError::InvalidRequest("token is not a valid header value".into()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        if let Some(content_type) = self.payload.default_content_type() {
            let value = HeaderValue::from_str(content_type).map_err(|_| {
                DispatchError::InvalidRequest(format!("invalid content type '{}'", content_type))
            })?;
            headers.insert(CONTENT_TYPE, value);
        }

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| DispatchError::InvalidRequest(format!("invalid header name '{}'", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                DispatchError::InvalidRequest(format!("invalid value for header '{}'", name))
            })?;
            headers.insert(name, value);
        }

        if self.payload.is_multipart() {
            headers.remove(CONTENT_TYPE);
        }

        Ok(headers)
    }

    /// Build the reqwest request with `token` attached
    pub(crate) fn build(
        &self,
        http: &reqwest::Client,
        token: &Token,
    ) -> Result<reqwest::RequestBuilder, DispatchError> {
        let headers = self.outgoing_headers(token)?;
        let builder = http.request(self.method.clone(), &self.url).headers(headers);

        let builder = match &self.payload {
            Payload::Empty => builder,
            Payload::Json(value) => {
                let body = serde_json::to_vec(value)
                    .map_err(|e| DispatchError::InvalidRequest(format!("unserializable JSON: {}", e)))?;
                builder.body(body)
            }
            Payload::Bytes { body, .. } => builder.body(body.clone()),
            Payload::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        Ok(builder)
    }
}

fn build_form(parts: &[MultipartPart]) -> Result<Form, DispatchError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            MultipartPart::Text { name, value } => form.text(name.clone(), value.clone()),
            MultipartPart::File {
                name,
                file_name,
                bytes,
                mime,
            } => {
                let mut file = Part::bytes(bytes.to_vec()).file_name(file_name.clone());
                if let Some(mime) = mime {
                    file = file.mime_str(mime).map_err(|_| {
                        DispatchError::InvalidRequest(format!("invalid MIME type '{}'", mime))
                    })?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

/// Response passed back to the caller without body transformation
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
