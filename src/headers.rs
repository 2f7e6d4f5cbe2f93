//! Header maps, merging, and subscription options

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Frame headers, name to value.
pub type Headers = HashMap<String, String>;

/// Correlation token the broker echoes back in its RECEIPT.
pub const RECEIPT: &str = "receipt";
/// Transaction a command belongs to.
pub const TRANSACTION: &str = "transaction";
pub const MESSAGE_ID: &str = "message-id";
pub const SUBSCRIPTION: &str = "subscription";
pub const DESTINATION: &str = "destination";
pub const SELECTOR: &str = "selector";

/// Merge header layers; later layers override earlier ones.
pub fn merge(layers: &[&Headers]) -> Headers {
    let mut merged = Headers::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Broker-side subscription tuning, each field bound to a fixed header key.
///
/// Unset fields contribute no header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    pub exclusive: Option<bool>,
    pub retroactive: Option<bool>,
    pub dispatch_async: Option<bool>,
    pub max_pending_messages: Option<u32>,
    pub prefetch_size: Option<u32>,
    pub subscription_name: Option<String>,
    pub selector: Option<String>,
}

impl SubscriptionOptions {
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = Some(exclusive);
        self
    }

    pub fn retroactive(mut self, retroactive: bool) -> Self {
        self.retroactive = Some(retroactive);
        self
    }

    pub fn dispatch_async(mut self, dispatch_async: bool) -> Self {
        self.dispatch_async = Some(dispatch_async);
        self
    }

    pub fn max_pending_messages(mut self, limit: u32) -> Self {
        self.max_pending_messages = Some(limit);
        self
    }

    pub fn prefetch_size(mut self, size: u32) -> Self {
        self.prefetch_size = Some(size);
        self
    }

    pub fn subscription_name(mut self, name: impl Into<String>) -> Self {
        self.subscription_name = Some(name.into());
        self
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Render the set options as broker headers.
    pub fn to_headers(&self) -> Headers {
        let mut headers = Headers::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                headers.insert(key.to_string(), value);
            }
        };

        put("activemq.exclusive", self.exclusive.map(|v| v.to_string()));
        put("activemq.retroactive", self.retroactive.map(|v| v.to_string()));
        put("activemq.dispatchAsync", self.dispatch_async.map(|v| v.to_string()));
        put(
            "activemq.maximumPendingMessageLimit",
            self.max_pending_messages.map(|v| v.to_string()),
        );
        put("activemq.prefetchSize", self.prefetch_size.map(|v| v.to_string()));
        put("activemq.subscriptionName", self.subscription_name.clone());
        put(SELECTOR, self.selector.clone());

        headers
    }
}

/// A message delivered by the broker.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub headers: Headers,
    pub body: Bytes,
}

impl Message {
    pub fn new(headers: Headers, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(MESSAGE_ID).map(String::as_str)
    }

    pub fn subscription(&self) -> Option<&str> {
        self.headers.get(SUBSCRIPTION).map(String::as_str)
    }

    pub fn destination(&self) -> Option<&str> {
        self.headers.get(DESTINATION).map(String::as_str)
    }
}
