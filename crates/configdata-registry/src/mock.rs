//! # Mock Client & Testing Guide
//!
//! [`MockClient`] hands out a real [`ConfigDataClient`] whose requests are
//! answered from a queue of expectations instead of a registry. Every request
//! is also recorded as an [`Action`], so a test can assert on what was asked
//! as well as on what came back.
//!
//! | | MockClient | RegistryServer |
//! |---|---|---|
//! | **State** | None, answers are scripted | Real store, versions, watch log |
//! | **Determinism** | Fully deterministic | Subject to the scheduler |
//! | **Error injection** | `return_err(...)` | Needs a store in the right state |
//! | **Use case** | Logic *around* the client | The registry itself, end to end |
//!
//! ```rust
//! use configdata_registry::mock::MockClient;
//! use configdata_registry::{ConfigResource, RegistryError};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut mock = MockClient::new();
//!     mock.expect_get("cfg1")
//!         .return_ok(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"));
//!     mock.expect_get("gone")
//!         .return_err(RegistryError::not_found("default", "gone"));
//!
//!     let configs = mock.client().config_datas("default");
//!     assert_eq!(configs.get("cfg1").await.unwrap().value("k1"), Some("v1"));
//!     assert!(configs.get("gone").await.unwrap_err().is_not_found());
//!
//!     let verbs: Vec<_> = mock.actions().into_iter().map(|a| a.verb).collect();
//!     assert_eq!(verbs, vec!["get", "get"]);
//!     mock.verify();
//! }
//! ```
//!
//! For step-by-step control over each reply, [`create_mock_client`] returns the
//! raw request receiver and the `expect_*` helpers pull typed requests off it.

use crate::client::ConfigDataClient;
use crate::error::RegistryError;
use crate::message::{RegistryRequest, Response};
use crate::model::{ConfigResource, ConfigResourceList, ListOptions};
use crate::watch::{WatchEvent, WatchStream};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One request observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub verb: &'static str,
    pub namespace: String,
    /// Object name for get/delete/create/update; empty for list/watch.
    pub name: String,
}

enum Expectation {
    Get {
        name: String,
        response: Result<ConfigResource, RegistryError>,
    },
    List {
        response: Result<ConfigResourceList, RegistryError>,
    },
    Create {
        response: Result<ConfigResource, RegistryError>,
    },
    Update {
        response: Result<ConfigResource, RegistryError>,
    },
    Delete {
        name: String,
        response: Result<ConfigResource, RegistryError>,
    },
    Watch {
        response: Result<Vec<WatchEvent>, RegistryError>,
    },
}

impl Expectation {
    fn verb(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::List { .. } => "list",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Watch { .. } => "watch",
        }
    }
}

#[derive(Default)]
struct Shared {
    expectations: VecDeque<Expectation>,
    actions: Vec<Action>,
    mismatches: Vec<String>,
}

type SharedState = Arc<Mutex<Shared>>;

fn action_of(request: &RegistryRequest) -> Action {
    let name = match request {
        RegistryRequest::Get { name, .. } | RegistryRequest::Delete { name, .. } => name.clone(),
        RegistryRequest::Create { resource, .. } | RegistryRequest::Update { resource, .. } => {
            resource.metadata.name.clone()
        }
        RegistryRequest::List { .. } | RegistryRequest::Watch { .. } => String::new(),
    };
    Action {
        verb: request.verb(),
        namespace: request.namespace().to_string(),
        name,
    }
}

fn mismatch(request: &RegistryRequest, expected: Option<&Expectation>) -> String {
    format!(
        "unexpected {} request (expected {})",
        request.verb(),
        expected.map(Expectation::verb).unwrap_or("nothing")
    )
}

/// Replies to `request` from `expectation`, or returns the request untouched
/// if the two do not line up.
fn answer(request: RegistryRequest, expectation: Expectation) -> Result<(), (RegistryRequest, Expectation)> {
    match (request, expectation) {
        (RegistryRequest::Get { name, respond_to, .. }, Expectation::Get { name: want, response })
            if name == want =>
        {
            let _ = respond_to.send(response);
        }
        (RegistryRequest::List { respond_to, .. }, Expectation::List { response }) => {
            let _ = respond_to.send(response);
        }
        (RegistryRequest::Create { respond_to, .. }, Expectation::Create { response }) => {
            let _ = respond_to.send(response);
        }
        (RegistryRequest::Update { respond_to, .. }, Expectation::Update { response }) => {
            let _ = respond_to.send(response);
        }
        (
            RegistryRequest::Delete { name, respond_to, .. },
            Expectation::Delete { name: want, response },
        ) if name == want => {
            let _ = respond_to.send(response);
        }
        (RegistryRequest::Watch { respond_to, .. }, Expectation::Watch { response }) => {
            let _ = respond_to.send(response.map(WatchStream::from_events));
        }
        (request, expectation) => return Err((request, expectation)),
    }
    Ok(())
}

fn reject(request: RegistryRequest, reason: String) {
    let err = RegistryError::Internal(reason);
    match request {
        RegistryRequest::Get { respond_to, .. }
        | RegistryRequest::Create { respond_to, .. }
        | RegistryRequest::Update { respond_to, .. }
        | RegistryRequest::Delete { respond_to, .. } => {
            let _ = respond_to.send(Err(err));
        }
        RegistryRequest::List { respond_to, .. } => {
            let _ = respond_to.send(Err(err));
        }
        RegistryRequest::Watch { respond_to, .. } => {
            let _ = respond_to.send(Err(err));
        }
    }
}

/// A scripted registry with action recording.
pub struct MockClient {
    client: ConfigDataClient,
    shared: SharedState,
    _handle: tokio::task::JoinHandle<()>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    /// Creates a mock with no expectations. Must be called inside a runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel::<RegistryRequest>(100);
        let shared: SharedState = Arc::new(Mutex::new(Shared::default()));
        let state = shared.clone();

        let handle = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
                guard.actions.push(action_of(&request));
                let Some(expectation) = guard.expectations.pop_front() else {
                    let reason = mismatch(&request, None);
                    guard.mismatches.push(reason.clone());
                    drop(guard);
                    reject(request, reason);
                    continue;
                };
                drop(guard);

                if let Err((request, expectation)) = answer(request, expectation) {
                    let reason = mismatch(&request, Some(&expectation));
                    state
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .mismatches
                        .push(reason.clone());
                    reject(request, reason);
                }
            }
        });

        Self {
            client: ConfigDataClient::new(sender),
            shared,
            _handle: handle,
        }
    }

    pub fn client(&self) -> ConfigDataClient {
        self.client.clone()
    }

    /// Every request received so far, in arrival order.
    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.lock().actions.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn builder(&self, kind: ExpectKind) -> ExpectationBuilder {
        ExpectationBuilder {
            kind,
            shared: self.shared.clone(),
        }
    }

    pub fn expect_get(&mut self, name: &str) -> ExpectationBuilder {
        self.builder(ExpectKind::Get(name.to_string()))
    }

    pub fn expect_create(&mut self) -> ExpectationBuilder {
        self.builder(ExpectKind::Create)
    }

    pub fn expect_update(&mut self) -> ExpectationBuilder {
        self.builder(ExpectKind::Update)
    }

    pub fn expect_delete(&mut self, name: &str) -> ExpectationBuilder {
        self.builder(ExpectKind::Delete(name.to_string()))
    }

    pub fn expect_list(&mut self) -> ListExpectationBuilder {
        ListExpectationBuilder {
            shared: self.shared.clone(),
        }
    }

    pub fn expect_watch(&mut self) -> WatchExpectationBuilder {
        WatchExpectationBuilder {
            shared: self.shared.clone(),
        }
    }

    /// Panics if an expectation is left over or a request did not match.
    pub fn verify(&self) {
        let shared = self.lock();
        if !shared.mismatches.is_empty() {
            panic!("Mock received unexpected requests: {:?}", shared.mismatches);
        }
        if !shared.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining",
                shared.expectations.len()
            );
        }
    }
}

enum ExpectKind {
    Get(String),
    Create,
    Update,
    Delete(String),
}

/// Builder for expectations answered with a single object.
pub struct ExpectationBuilder {
    kind: ExpectKind,
    shared: SharedState,
}

impl ExpectationBuilder {
    fn push(self, response: Result<ConfigResource, RegistryError>) {
        let expectation = match self.kind {
            ExpectKind::Get(name) => Expectation::Get { name, response },
            ExpectKind::Create => Expectation::Create { response },
            ExpectKind::Update => Expectation::Update { response },
            ExpectKind::Delete(name) => Expectation::Delete { name, response },
        };
        self.shared
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .expectations
            .push_back(expectation);
    }

    pub fn return_ok(self, resource: ConfigResource) {
        self.push(Ok(resource));
    }

    pub fn return_err(self, error: RegistryError) {
        self.push(Err(error));
    }
}

pub struct ListExpectationBuilder {
    shared: SharedState,
}

impl ListExpectationBuilder {
    fn push(self, response: Result<ConfigResourceList, RegistryError>) {
        self.shared
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .expectations
            .push_back(Expectation::List { response });
    }

    pub fn return_ok(self, list: ConfigResourceList) {
        self.push(Ok(list));
    }

    pub fn return_err(self, error: RegistryError) {
        self.push(Err(error));
    }
}

pub struct WatchExpectationBuilder {
    shared: SharedState,
}

impl WatchExpectationBuilder {
    fn push(self, response: Result<Vec<WatchEvent>, RegistryError>) {
        self.shared
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .expectations
            .push_back(Expectation::Watch { response });
    }

    /// The watch call succeeds with a stream over `events`.
    pub fn return_events(self, events: Vec<WatchEvent>) {
        self.push(Ok(events));
    }

    pub fn return_err(self, error: RegistryError) {
        self.push(Err(error));
    }
}

// =============================================================================
// RAW CHANNEL HELPERS
// =============================================================================

/// Creates a client and the receiver its requests arrive on.
///
/// Useful when a test needs to hold a reply back, answer out of order, or
/// inspect the full request payload.
pub fn create_mock_client(buffer_size: usize) -> (ConfigDataClient, mpsc::Receiver<RegistryRequest>) {
    let (sender, receiver) = mpsc::channel(buffer_size.max(1));
    (ConfigDataClient::new(sender), receiver)
}

/// Next request if it is a Get: `(namespace, name, reply)`.
pub async fn expect_get(
    receiver: &mut mpsc::Receiver<RegistryRequest>,
) -> Option<(String, String, Response<ConfigResource>)> {
    match receiver.recv().await {
        Some(RegistryRequest::Get {
            namespace,
            name,
            respond_to,
        }) => Some((namespace, name, respond_to)),
        _ => None,
    }
}

/// Next request if it is a Create: `(namespace, resource, reply)`.
pub async fn expect_create(
    receiver: &mut mpsc::Receiver<RegistryRequest>,
) -> Option<(String, ConfigResource, Response<ConfigResource>)> {
    match receiver.recv().await {
        Some(RegistryRequest::Create {
            namespace,
            resource,
            respond_to,
        }) => Some((namespace, resource, respond_to)),
        _ => None,
    }
}

/// Next request if it is an Update: `(namespace, resource, reply)`.
pub async fn expect_update(
    receiver: &mut mpsc::Receiver<RegistryRequest>,
) -> Option<(String, ConfigResource, Response<ConfigResource>)> {
    match receiver.recv().await {
        Some(RegistryRequest::Update {
            namespace,
            resource,
            respond_to,
        }) => Some((namespace, resource, respond_to)),
        _ => None,
    }
}

/// Next request if it is a List: `(namespace, options, reply)`.
pub async fn expect_list(
    receiver: &mut mpsc::Receiver<RegistryRequest>,
) -> Option<(String, ListOptions, Response<ConfigResourceList>)> {
    match receiver.recv().await {
        Some(RegistryRequest::List {
            namespace,
            options,
            respond_to,
        }) => Some((namespace, options, respond_to)),
        _ => None,
    }
}

/// Next request if it is a Delete: `(namespace, name, reply)`.
pub async fn expect_delete(
    receiver: &mut mpsc::Receiver<RegistryRequest>,
) -> Option<(String, String, Response<ConfigResource>)> {
    match receiver.recv().await {
        Some(RegistryRequest::Delete {
            namespace,
            name,
            respond_to,
        }) => Some((namespace, name, respond_to)),
        _ => None,
    }
}

/// Next request if it is a Watch: `(namespace, options, reply)`.
pub async fn expect_watch(
    receiver: &mut mpsc::Receiver<RegistryRequest>,
) -> Option<(String, ListOptions, Response<WatchStream>)> {
    match receiver.recv().await {
        Some(RegistryRequest::Watch {
            namespace,
            options,
            respond_to,
        }) => Some((namespace, options, respond_to)),
        _ => None,
    }
}
