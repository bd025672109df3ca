//! Bootstrap sequence: load this endpoint's records, pick its
//! communicator, and make sure every control template the communicator
//! declares exists on the server before the communicator starts.
//!
//! ```text
//! Idle → FetchingEndpoint → FetchingEndpointType → FetchingControls
//!      → Reconciling { pass } → Running
//!                   ↘ Stalled (endpoint never loaded)
//! ```
//!
//! [`BootstrapSync`] is a pure state machine. The agent sends the
//! requests it asks for and feeds acknowledgements back in.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::communicator::{Communicator, StubCommunicator, TemplateSet};
use crate::error::CoreError;
use crate::model::{Control, ControlTemplate, EndpointType, EntityId};
use crate::registry::CommunicatorRegistry;
use crate::request::{Continuation, DataRequest};
use crate::store::DataStore;

/// Reconciliation may create missing controls once and re-check once.
pub const MAX_TEMPLATE_PASSES: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    FetchingEndpoint,
    FetchingEndpointType,
    FetchingControls,
    Reconciling { pass: u8 },
    Running,
    /// The endpoint record never arrived. Nothing further happens.
    Stalled,
}

/// What the agent should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapStep {
    /// Send this request and feed its acknowledgement back.
    Request(DataRequest),
    /// Reconciliation finished: hand the controls over and start.
    Start,
    Stalled,
}

#[derive(Debug)]
pub struct BootstrapSync {
    endpoint_id: EntityId,
    state: BootstrapState,
    pass: u8,
    templates: TemplateSet,
}

impl BootstrapSync {
    pub fn new(endpoint_id: EntityId) -> Self {
        Self {
            endpoint_id,
            state: BootstrapState::Idle,
            pass: 0,
            templates: TemplateSet::new(),
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn pass(&self) -> u8 {
        self.pass
    }

    /// Whether an acknowledgement for `continuation` belongs to the
    /// current step. Late or duplicate replies are ignored.
    pub fn expects(&self, continuation: Continuation) -> bool {
        matches!(
            (self.state, continuation),
            (BootstrapState::FetchingEndpoint, Continuation::Endpoint)
                | (BootstrapState::FetchingEndpointType, Continuation::EndpointType)
                | (BootstrapState::FetchingControls, Continuation::Controls)
                | (BootstrapState::Reconciling { .. }, Continuation::AddControls)
        )
    }

    /// Begin with the endpoint fetch.
    pub fn start(&mut self) -> BootstrapStep {
        self.state = BootstrapState::FetchingEndpoint;
        info!(endpoint_id = %self.endpoint_id, "fetching endpoint");
        BootstrapStep::Request(DataRequest::get_endpoint(&self.endpoint_id))
    }

    pub fn endpoint_fetched(&mut self, store: &DataStore) -> BootstrapStep {
        let Some(endpoint) = store.endpoint(&self.endpoint_id) else {
            warn!(endpoint_id = %self.endpoint_id, "endpoint data is missing");
            self.state = BootstrapState::Stalled;
            return BootstrapStep::Stalled;
        };
        self.state = BootstrapState::FetchingEndpointType;
        debug!(endpoint = %endpoint.name, endpoint_type_id = %endpoint.endpoint_type_id, "endpoint loaded");
        BootstrapStep::Request(DataRequest::get_endpoint_type(&endpoint.endpoint_type_id))
    }

    pub fn endpoint_type_fetched(&mut self) -> BootstrapStep {
        self.state = BootstrapState::FetchingControls;
        BootstrapStep::Request(DataRequest::get_controls(&self.endpoint_id))
    }

    /// One reconciliation pass.
    ///
    /// Pass 1 reads the communicator's templates and asks for any the
    /// server lacks. Pass 2 expects them to have arrived with the add
    /// acknowledgement; if they still have not, pass 3 fails.
    pub fn reconcile(
        &mut self,
        communicator: &dyn Communicator,
        store: &DataStore,
    ) -> Result<BootstrapStep, CoreError> {
        self.pass += 1;
        self.state = BootstrapState::Reconciling { pass: self.pass };

        let known = store.controls_for(&self.endpoint_id);
        if self.pass > MAX_TEMPLATE_PASSES {
            return Err(CoreError::TemplateSyncFailed {
                passes: self.pass,
                missing: missing_templates(&self.templates, &known).len(),
            });
        }

        if self.pass == 1 {
            self.templates = communicator.control_templates();
        }

        let missing = missing_templates(&self.templates, &known);
        if missing.is_empty() {
            info!(pass = self.pass, controls = known.len(), "controls successfully synced");
            self.state = BootstrapState::Running;
            return Ok(BootstrapStep::Start);
        }

        if self.pass == 1 {
            info!(count = missing.len(), "adding new controls");
            return Ok(BootstrapStep::Request(DataRequest::add_controls(&missing)));
        }

        warn!(
            pass = self.pass,
            missing = missing.len(),
            "server did not return the added controls"
        );
        self.reconcile(communicator, store)
    }
}

/// Templates whose `ctid` matches no known control.
pub fn missing_templates(templates: &TemplateSet, known: &[Arc<Control>]) -> Vec<ControlTemplate> {
    let present: HashSet<&str> = known.iter().map(|c| c.ctid.as_str()).collect();
    templates
        .iter()
        .filter(|(ctid, _)| !present.contains(ctid.as_str()))
        .map(|(_, template)| template.clone())
        .collect()
}

/// Construct the communicator for an endpoint.
///
/// With `use_stub` the registry is bypassed. Otherwise the type's
/// `communicatorClass` must be registered.
pub fn resolve_communicator(
    registry: &CommunicatorRegistry,
    endpoint_type: Option<&EndpointType>,
    use_stub: bool,
) -> Result<Box<dyn Communicator>, CoreError> {
    if use_stub {
        info!("using stub communicator");
        return Ok(Box::new(StubCommunicator::new()));
    }
    let class = match endpoint_type {
        Some(ty) => ty.communicator_class.as_str(),
        None => {
            warn!("endpoint type data is missing");
            ""
        }
    };
    info!(communicator = class, "instantiating communicator");
    registry.instantiate(class)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::communicator::CommunicatorContext;
    use crate::model::{ControlType, ControlUpdate};
    use crate::store::{ControlSet, DataSnapshot};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Declares(Vec<&'static str>);

    impl Communicator for Declares {
        fn name(&self) -> &str {
            "Declares"
        }
        fn configure(&mut self, _ctx: CommunicatorContext) {}
        fn control_templates(&self) -> TemplateSet {
            self.0
                .iter()
                .map(|ctid| {
                    (
                        (*ctid).to_owned(),
                        ControlTemplate::new(EntityId::from("E1"), *ctid, *ctid, ControlType::Int),
                    )
                })
                .collect()
        }
        fn set_templates(&mut self, _controls: &ControlSet) {}
        fn connect(&mut self) {}
        fn disconnect(&mut self) {}
        fn is_connected(&self) -> bool {
            false
        }
        fn handle_control_update_request(&mut self, _update: &ControlUpdate) {}
    }

    fn store_with_controls(ctids: &[&str]) -> DataStore {
        let store = DataStore::new();
        let controls: serde_json::Map<_, _> = ctids
            .iter()
            .map(|ctid| {
                (
                    format!("C-{ctid}"),
                    json!({ "endpoint_id": "E1", "ctid": ctid }),
                )
            })
            .collect();
        store.apply(DataSnapshot::from_payload(
            &json!({ "add": { "controls": controls } }),
        ));
        store
    }

    #[test]
    fn walks_the_fetch_sequence() {
        let store = DataStore::new();
        store.apply(DataSnapshot::from_payload(&json!({
            "add": { "endpoints": { "E1": { "endpointType_id": "T1" } } }
        })));
        let mut sync = BootstrapSync::new(EntityId::from("E1"));

        assert!(!sync.expects(Continuation::Endpoint));
        let BootstrapStep::Request(req) = sync.start() else { panic!() };
        assert_eq!(req.continuation, Continuation::Endpoint);
        assert!(sync.expects(Continuation::Endpoint));
        assert!(!sync.expects(Continuation::Controls));

        let BootstrapStep::Request(req) = sync.endpoint_fetched(&store) else { panic!() };
        assert_eq!(req.continuation, Continuation::EndpointType);
        assert_eq!(req.data["params"]["_id"], json!("T1"));

        let BootstrapStep::Request(req) = sync.endpoint_type_fetched() else { panic!() };
        assert_eq!(req.continuation, Continuation::Controls);
        assert_eq!(sync.state(), BootstrapState::FetchingControls);
    }

    #[test]
    fn missing_endpoint_stalls() {
        let mut sync = BootstrapSync::new(EntityId::from("E1"));
        sync.start();
        assert_eq!(sync.endpoint_fetched(&DataStore::new()), BootstrapStep::Stalled);
        assert_eq!(sync.state(), BootstrapState::Stalled);
    }

    #[test]
    fn nothing_missing_starts_on_first_pass() {
        let store = store_with_controls(&["power", "input"]);
        let mut sync = BootstrapSync::new(EntityId::from("E1"));
        let step = sync.reconcile(&Declares(vec!["power", "input"]), &store).unwrap();
        assert_eq!(step, BootstrapStep::Start);
        assert_eq!(sync.pass(), 1);
        assert_eq!(sync.state(), BootstrapState::Running);
    }

    #[test]
    fn missing_templates_are_added_once_then_synced() {
        let comm = Declares(vec!["power", "input"]);
        let mut sync = BootstrapSync::new(EntityId::from("E1"));

        let step = sync.reconcile(&comm, &DataStore::new()).unwrap();
        let BootstrapStep::Request(req) = step else { panic!("expected add request") };
        assert_eq!(req.continuation, Continuation::AddControls);
        assert_eq!(req.data["controls"].as_array().unwrap().len(), 2);

        let store = store_with_controls(&["power", "input"]);
        assert_eq!(sync.reconcile(&comm, &store).unwrap(), BootstrapStep::Start);
        assert_eq!(sync.pass(), 2);
    }

    #[test]
    fn templates_that_never_arrive_fail_on_pass_three() {
        let comm = Declares(vec!["power"]);
        let store = DataStore::new();
        let mut sync = BootstrapSync::new(EntityId::from("E1"));

        assert!(matches!(
            sync.reconcile(&comm, &store).unwrap(),
            BootstrapStep::Request(_)
        ));
        let err = sync.reconcile(&comm, &store).unwrap_err();
        assert!(matches!(
            err,
            CoreError::TemplateSyncFailed {
                passes: 3,
                missing: 1
            }
        ));
        assert_eq!(sync.pass(), 3);
    }

    #[test]
    fn stub_bypasses_registry() {
        let registry = CommunicatorRegistry::default();
        let comm = resolve_communicator(&registry, None, true).unwrap();
        assert_eq!(comm.name(), StubCommunicator::NAME);

        assert!(matches!(
            resolve_communicator(&registry, None, false),
            Err(CoreError::CommunicatorNotFound { .. })
        ));
    }
}
