use std::collections::HashMap;

use derive_builder::Builder;

use crate::data::{Restaurant, COLLECTION, KEY_MAPPING};
use crate::db::{Key, RecordStore};
use crate::error::HandlerError;

pub const METHOD_NOT_ALLOWED: &str = "Method not allowed";

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// An HTTP-shaped request, as handed over by a server or an API gateway.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct Request {
    pub method: String,
    #[builder(default = "\"/restaurants\".to_string()")]
    pub path: String,
    #[builder(default)]
    pub headers: HashMap<String, String>,
    /// Parameters a router already extracted from the path, e.g. `id`.
    #[builder(default)]
    pub path_parameters: HashMap<String, String>,
    /// Raw body bytes; decoded as UTF-8 JSON only by the operations that read it.
    #[builder(setter(into, strip_option), default)]
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Response {
    fn new(status_code: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status_code,
            headers: HashMap::from([("Content-Type".to_string(), content_type.to_string())]),
            body: body.into(),
        }
    }

    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self::new(status_code, TEXT, body)
    }

    pub fn json(status_code: u16, body: impl Into<String>) -> Self {
        Self::new(status_code, JSON, body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "GET" => Some(Self::List),
            "POST" => Some(Self::Create),
            "PUT" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn error_prefix(self) -> &'static str {
        match self {
            Self::List => "Error fetching restaurants",
            Self::Create => "Error creating restaurant",
            Self::Update => "Error updating restaurant",
            Self::Delete => "Error deleting restaurant",
        }
    }
}

enum Route<'a> {
    Collection,
    Item(&'a str),
}

fn route(path: &str) -> Option<Route<'_>> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next(), segments.next()) {
        (Some(COLLECTION), None, None) => Some(Route::Collection),
        (Some(COLLECTION), Some(id), None) => Some(Route::Item(id)),
        _ => None,
    }
}

fn no_route(path: &str) -> HandlerError {
    HandlerError::NotFound(format!("no resource at {path}"))
}

fn expect_collection(request: &Request) -> Result<(), HandlerError> {
    match route(&request.path) {
        Some(Route::Collection) => Ok(()),
        _ => Err(no_route(&request.path)),
    }
}

fn restaurant_id(request: &Request) -> Result<&str, HandlerError> {
    let from_path = match route(&request.path) {
        Some(Route::Item(id)) => Some(id),
        Some(Route::Collection) => None,
        None => return Err(no_route(&request.path)),
    };
    request
        .path_parameters
        .get(KEY_MAPPING.attribute)
        .map(String::as_str)
        .or(from_path)
        .ok_or_else(|| {
            HandlerError::Validation(format!("missing path parameter `{}`", KEY_MAPPING.attribute))
        })
}

fn parse_body(request: &Request) -> Result<Restaurant, HandlerError> {
    let body = request.body.as_deref().unwrap_or_default();
    let body = std::str::from_utf8(body)
        .map_err(|err| HandlerError::Validation(format!("request body is not UTF-8: {err}")))?;
    if body.trim().is_empty() {
        return Err(HandlerError::Validation("request body is empty".to_string()));
    }
    serde_json::from_str(body)
        .map_err(|err| HandlerError::Validation(format!("invalid restaurant body: {err}")))
}

pub struct RestaurantHandler<S> {
    store: S,
}

impl<S: RecordStore> RestaurantHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Dispatch `request` on its method. Never fails, errors become error responses.
    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn handle(&self, request: &Request) -> Response {
        let Some(operation) = Operation::from_method(&request.method) else {
            tracing::warn!("method not allowed");
            return Response::text(405, METHOD_NOT_ALLOWED);
        };

        match self.run(operation, request).await {
            Ok(response) => {
                tracing::info!(status = response.status_code, "request handled");
                response
            }
            Err(err) => {
                let body = format!("{}: {err}", operation.error_prefix());
                tracing::error!(status = err.status_code(), "{body}");
                Response::text(err.status_code(), body)
            }
        }
    }

    async fn run(&self, operation: Operation, request: &Request) -> Result<Response, HandlerError> {
        match operation {
            Operation::List => {
                expect_collection(request)?;
                let restaurants = self.list().await?;
                let body = serde_json::to_string(&restaurants).map_err(anyhow::Error::from)?;
                Ok(Response::json(200, body))
            }
            Operation::Create => {
                expect_collection(request)?;
                self.create(&parse_body(request)?).await?;
                Ok(Response::text(201, "Restaurant created successfully"))
            }
            Operation::Update => {
                expect_collection(request)?;
                self.update(&parse_body(request)?).await?;
                Ok(Response::text(200, "Restaurant updated successfully"))
            }
            Operation::Delete => {
                self.delete(restaurant_id(request)?).await?;
                Ok(Response::text(200, "Restaurant deleted successfully"))
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<Restaurant>, HandlerError> {
        let items = self.store.scan(COLLECTION).await?;
        let restaurants = items
            .iter()
            .map(Restaurant::from_attributes)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(restaurants)
    }

    /// Put the whole record, overwriting any record with the same id.
    pub async fn create(&self, restaurant: &Restaurant) -> Result<(), HandlerError> {
        self.store
            .put(COLLECTION, &restaurant.key(), restaurant.to_attributes())
            .await?;
        Ok(())
    }

    /// Overwrite every non-key field; creates the record if it does not exist.
    pub async fn update(&self, restaurant: &Restaurant) -> Result<(), HandlerError> {
        self.store
            .update(COLLECTION, &restaurant.key(), restaurant.value_attributes())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), HandlerError> {
        let key = Key::new(KEY_MAPPING.attribute, id);
        self.store.delete(COLLECTION, &key).await?;
        Ok(())
    }
}
