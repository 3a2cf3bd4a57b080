//! Catalyst polling: GraphQL query, transform, publish.

use serde_json::{json, Value};
use std::time::Duration;
use takbridge_client::TakConnection;
use takbridge_core::config::{ConsumerConfig, TakConfig};
use takbridge_core::{ChatRuleSet, RuleSet, StoreError};
use takbridge_cot::Event;
use takbridge_pool::{Contact, ContactBook};
use takbridge_store::DedupLedger;
use takbridge_transform::{records_to_events, ChatMessage, ChatPipeline, TransformedEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Response used whenever a query yields nothing usable.
pub fn empty_response() -> Value {
    json!({"data": {}})
}

/// GraphQL client for the Catalyst gateway.
#[derive(Clone)]
pub struct GraphqlClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl GraphqlClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    /// POSTs `{query, variables}` with the bearer token.
    ///
    /// Never fails: transport errors, non-success statuses and unparsable
    /// bodies all yield [`empty_response`].
    pub async fn query(&self, query: &str, variables: &Value) -> Value {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                error!(endpoint = %self.endpoint, error = %e, "GraphQL request failed");
                return empty_response();
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint = %self.endpoint, status = status.as_u16(), "GraphQL query returned an error status");
            return empty_response();
        }

        match response.json::<Value>().await {
            Ok(body) => body,
            Err(e) => {
                error!(endpoint = %self.endpoint, error = %e, "Error parsing GraphQL response");
                empty_response()
            }
        }
    }
}

/// Output of one poll.
#[derive(Debug, Default)]
pub struct Batch {
    pub events: Vec<TransformedEvent>,
    pub chats: Vec<ChatMessage>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.chats.is_empty()
    }
}

/// Polls the gateway and turns the response into events and chat messages.
pub struct Consumer {
    graphql: GraphqlClient,
    query: String,
    variables: Value,
    rules: RuleSet,
    chat_rules: ChatRuleSet,
    chat: ChatPipeline,
    poll_interval: Duration,
}

impl Consumer {
    pub fn from_config(tak: &TakConfig, consumer: &ConsumerConfig) -> Result<Self, StoreError> {
        let ledger = DedupLedger::open(&consumer.local_db_path)?;
        Ok(Self {
            graphql: GraphqlClient::new(&consumer.catalyst_endpoint, &consumer.catalyst_token),
            query: consumer.catalyst_query.clone(),
            variables: consumer.catalyst_query_variables.clone(),
            rules: consumer.parser.clone(),
            chat_rules: consumer.chat.clone(),
            chat: ChatPipeline::new(ledger, &tak.callsign, tak.catalyst_lat, tak.catalyst_lon),
            poll_interval: consumer.poll_interval(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn poll(&self) -> Batch {
        let response = self.graphql.query(&self.query, &self.variables).await;
        if response.get("data").map_or(true, Value::is_null) {
            debug!("No data returned from GraphQL query");
            return Batch::default();
        }

        let events = records_to_events(&response, &self.rules, self.poll_interval);
        let chats = self.chat.records_to_chat(&response, &self.chat_rules).await;
        Batch { events, chats }
    }
}

/// Routes a batch to the primary connection or to contact connections.
#[derive(Clone)]
pub struct Publisher {
    primary: TakConnection,
    contacts: ContactBook,
    group: String,
    role: String,
}

impl Publisher {
    pub fn new(primary: TakConnection, contacts: ContactBook, tak: &TakConfig) -> Self {
        Self {
            primary,
            contacts,
            group: tak.group.clone(),
            role: tak.role.clone(),
        }
    }

    pub async fn publish(&self, batch: Batch) {
        let mut outbound: Vec<Event> = Vec::new();

        for transformed in batch.events {
            if !transformed.contact {
                outbound.push(transformed.event);
                continue;
            }
            let contact = Contact::from_event(&transformed.event).with_group(&self.group, &self.role);
            let callsign = contact.callsign.clone();
            if let Err(e) = self.contacts.add_or_refresh(contact).await {
                error!(rule = %transformed.rule, callsign = %callsign, error = %e, "Failed to refresh contact");
            }
        }

        for chat in batch.chats {
            match chat.contact {
                Some(callsign) => {
                    if !self.contacts.publish_as_contact(&callsign, chat.event.clone()) {
                        warn!(callsign = %callsign, "Contact not connected, sending chat on primary connection");
                        outbound.push(chat.event);
                    }
                }
                None => outbound.push(chat.event),
            }
        }

        if !outbound.is_empty() {
            info!(count = outbound.len(), "Publishing CoT");
            self.primary.write(outbound);
        }
    }
}

/// Polls every `poll_interval` until `token` is cancelled.
pub fn spawn_consumer(consumer: Consumer, publisher: Publisher, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(consumer.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = consumer.poll_interval().as_millis() as u64, "Consumer polling started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let batch = consumer.poll().await;
                    if batch.is_empty() {
                        debug!("Nothing to publish");
                        continue;
                    }
                    publisher.publish(batch).await;
                }
            }
        }
        info!("Consumer polling stopped");
    })
}
