//! In-memory stand-in for the Stripe REST API.
//!
//! Objects live in a map keyed by resource kind and id. Canned responses can
//! be queued per `(kind, method)` with [`FakeStripeApi::stub`]; they are
//! consumed before the default behaviour kicks in.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::{
    app_error::{AppError, AppResult},
    application::ports::stripe_api::{ApiMethod, ApiRequest, ResourceKind, StripeApi},
    domain::entities::stripe_mode::StripeMode,
};

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Customers => "cus",
        ResourceKind::Products => "prod",
        ResourceKind::PaymentIntents => "pi",
        ResourceKind::SetupIntents => "seti",
        ResourceKind::PaymentMethods => "pm",
        ResourceKind::Subscriptions => "sub",
        ResourceKind::CheckoutSessions => "cs",
        ResourceKind::InvoiceItems => "ii",
        ResourceKind::Refunds => "re",
        ResourceKind::WebhookEndpoints => "we",
        ResourceKind::Events => "evt",
    }
}

fn object_name(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Customers => "customer",
        ResourceKind::Products => "product",
        ResourceKind::PaymentIntents => "payment_intent",
        ResourceKind::SetupIntents => "setup_intent",
        ResourceKind::PaymentMethods => "payment_method",
        ResourceKind::Subscriptions => "subscription",
        ResourceKind::CheckoutSessions => "checkout.session",
        ResourceKind::InvoiceItems => "invoiceitem",
        ResourceKind::Refunds => "refund",
        ResourceKind::WebhookEndpoints => "webhook_endpoint",
        ResourceKind::Events => "event",
    }
}

fn missing(id: &str) -> AppError {
    AppError::InvalidRequest {
        code: "resource_missing".into(),
        message: format!("No such object: '{id}'"),
    }
}

fn merge(target: &mut Value, params: &Value) {
    if let (Value::Object(target), Value::Object(params)) = (target, params) {
        for (key, value) in params {
            target.insert(key.clone(), value.clone());
        }
    }
}

struct StoredObject {
    /// `None` for objects seeded with `put_object`, visible in every mode.
    mode: Option<StripeMode>,
    value: Value,
}

#[derive(Default)]
pub struct FakeStripeApi {
    objects: Mutex<HashMap<(ResourceKind, String), StoredObject>>,
    created: Mutex<Vec<(ResourceKind, String)>>,
    stubs: Mutex<HashMap<(ResourceKind, ApiMethod), VecDeque<AppResult<Value>>>>,
    calls: Mutex<Vec<(StripeMode, ApiRequest)>>,
    next_id: Mutex<u64>,
}

impl FakeStripeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next call with this kind and method.
    pub fn stub(&self, kind: ResourceKind, method: ApiMethod, response: AppResult<Value>) {
        self.stubs
            .lock()
            .unwrap()
            .entry((kind, method))
            .or_default()
            .push_back(response);
    }

    /// Seeds a remote object as if it had been created outside the service.
    pub fn put_object(&self, kind: ResourceKind, id: &str, mut value: Value) {
        if let Value::Object(map) = &mut value {
            map.entry("id").or_insert_with(|| json!(id));
            map.entry("object")
                .or_insert_with(|| json!(object_name(kind)));
        }
        self.objects.lock().unwrap().insert(
            (kind, id.to_string()),
            StoredObject { mode: None, value },
        );
    }

    pub fn object(&self, kind: ResourceKind, id: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .map(|stored| stored.value.clone())
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn count(&self, kind: ResourceKind, method: ApiMethod) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.kind == kind && r.method == method)
            .count()
    }

    pub fn last_call(&self, kind: ResourceKind, method: ApiMethod) -> Option<ApiRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, r)| r.kind == kind && r.method == method)
            .map(|(_, request)| request.clone())
    }

    /// Ids handed out by `create`, oldest first.
    pub fn created_ids(&self, kind: ResourceKind) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn take_stub(&self, kind: ResourceKind, method: ApiMethod) -> Option<AppResult<Value>> {
        self.stubs
            .lock()
            .unwrap()
            .get_mut(&(kind, method))
            .and_then(VecDeque::pop_front)
    }

    fn create(&self, mode: StripeMode, kind: ResourceKind, params: &Value) -> Value {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("{}_test{}", id_prefix(kind), *next)
        };

        let mut object = match params {
            Value::Object(map) => Value::Object(map.clone()),
            _ => Value::Object(Map::new()),
        };
        object["id"] = json!(id);
        object["object"] = json!(object_name(kind));

        match kind {
            ResourceKind::PaymentIntents | ResourceKind::SetupIntents => {
                object["client_secret"] = json!(format!("{id}_secret_test"));
            }
            ResourceKind::CheckoutSessions => {
                object["url"] = json!(format!("https://checkout.stripe.com/c/pay/{id}"));
            }
            ResourceKind::Subscriptions => {
                object["items"] = json!({"object": "list", "data": []});
                if object.get("status").is_none() {
                    object["status"] = json!("active");
                }
            }
            _ => {}
        }

        self.objects.lock().unwrap().insert(
            (kind, id.clone()),
            StoredObject {
                mode: Some(mode),
                value: object.clone(),
            },
        );
        self.created.lock().unwrap().push((kind, id));
        object
    }

    fn list(&self, mode: StripeMode, kind: ResourceKind, params: &Value) -> Value {
        let filters: Vec<(&String, &str)> = params
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(key, _)| key.as_str() != "limit")
                    .filter_map(|(key, value)| value.as_str().map(|v| (key, v)))
                    .collect()
            })
            .unwrap_or_default();

        let objects = self.objects.lock().unwrap();
        let mut data: Vec<(&String, &Value)> = objects
            .iter()
            .filter(|((k, _), stored)| {
                *k == kind && stored.mode.is_none_or(|stored_mode| stored_mode == mode)
            })
            .filter(|(_, stored)| {
                filters
                    .iter()
                    .all(|(key, expected)| stored.value[key.as_str()].as_str() == Some(*expected))
            })
            .map(|((_, id), stored)| (id, &stored.value))
            .collect();
        data.sort_by(|a, b| a.0.cmp(b.0));

        json!({
            "object": "list",
            "data": data.into_iter().map(|(_, v)| v.clone()).collect::<Vec<_>>()
        })
    }

    fn modify(&self, kind: ResourceKind, id: &str, apply: impl FnOnce(&mut Value)) -> AppResult<Value> {
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| missing(id))?;
        apply(&mut stored.value);
        Ok(stored.value.clone())
    }
}

#[async_trait]
impl StripeApi for FakeStripeApi {
    async fn call(&self, mode: StripeMode, request: ApiRequest) -> AppResult<Value> {
        self.calls.lock().unwrap().push((mode, request.clone()));

        if let Some(response) = self.take_stub(request.kind, request.method) {
            return response;
        }

        let kind = request.kind;
        let id = request.id.clone().unwrap_or_default();
        match request.method {
            ApiMethod::Create => Ok(self.create(mode, kind, &request.params)),
            ApiMethod::All => Ok(self.list(mode, kind, &request.params)),
            ApiMethod::Retrieve => self.object(kind, &id).ok_or_else(|| missing(&id)),
            ApiMethod::Update
            | ApiMethod::Confirm
            | ApiMethod::Capture
            | ApiMethod::Attach
            | ApiMethod::Detach => self.modify(kind, &id, |object| merge(object, &request.params)),
            ApiMethod::Cancel => self.modify(kind, &id, |object| {
                object["status"] = json!("canceled");
            }),
            ApiMethod::Delete => {
                self.objects
                    .lock()
                    .unwrap()
                    .remove(&(kind, id.clone()))
                    .ok_or_else(|| missing(&id))?;
                Ok(json!({"id": id, "object": object_name(kind), "deleted": true}))
            }
        }
    }
}
