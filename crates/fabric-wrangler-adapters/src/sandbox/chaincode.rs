use super::ledger::{Version, WorldState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChaincodeError {
    #[error("Incorrect number of arguments. Expecting {0}")]
    IncorrectArguments(String),

    #[error("Received unknown invoke function name - '{0}'")]
    UnknownFunction(String),

    #[error("This project does not exist - {0}")]
    NotFound(String),

    #[error("This project already exists - {0}")]
    AlreadyExists(String),

    #[error("Only creator can remove the project - {0}")]
    NotCreator(String),

    #[error("{0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub name: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentChange {
    pub chaincode_id: String,
    pub version: String,
}

/// Read/write set produced by one simulation. Serialized as JSON into the
/// proposal response `results`; map ordering keeps the bytes deterministic
/// across peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResults {
    pub chaincode_id: String,
    pub reads: BTreeMap<String, Option<Version>>,
    /// `None` deletes the key.
    pub writes: BTreeMap<String, Option<Vec<u8>>>,
    pub event: Option<EventRecord>,
    pub deployment: Option<DeploymentChange>,
}

impl SimulationResults {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Per-simulation view handed to chaincode. Keys are namespaced by chaincode
/// id; reads record the committed version they observed.
pub struct ChaincodeStub<'a> {
    state: &'a WorldState,
    namespace: String,
    tx_id: String,
    submitter: String,
    timestamp: DateTime<Utc>,
    function: String,
    args: Vec<String>,
    transient: &'a BTreeMap<String, Vec<u8>>,
    results: SimulationResults,
}

impl<'a> ChaincodeStub<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a WorldState,
        chaincode_id: &str,
        tx_id: &str,
        submitter: &str,
        timestamp: DateTime<Utc>,
        function: &str,
        args: &[String],
        transient: &'a BTreeMap<String, Vec<u8>>,
    ) -> Self {
        Self {
            state,
            namespace: chaincode_id.to_string(),
            tx_id: tx_id.to_string(),
            submitter: submitter.to_string(),
            timestamp,
            function: function.to_string(),
            args: args.to_vec(),
            transient,
            results: SimulationResults {
                chaincode_id: chaincode_id.to_string(),
                ..SimulationResults::default()
            },
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn submitter(&self) -> &str {
        &self.submitter
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn transient(&self, key: &str) -> Option<&[u8]> {
        self.transient.get(key).map(Vec::as_slice)
    }

    fn qualified(&self, key: &str) -> String {
        format!("{}/{}", self.namespace, key)
    }

    pub fn get_state(&mut self, key: &str) -> Option<Vec<u8>> {
        let qualified = self.qualified(key);
        if let Some(pending) = self.results.writes.get(&qualified) {
            return pending.clone();
        }
        let entry = self.state.get(&qualified);
        self.results
            .reads
            .entry(qualified)
            .or_insert_with(|| entry.map(|e| e.version));
        entry.map(|e| e.value.clone())
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) {
        let qualified = self.qualified(key);
        self.results.writes.insert(qualified, Some(value));
    }

    pub fn del_state(&mut self, key: &str) {
        let qualified = self.qualified(key);
        self.results.writes.insert(qualified, None);
    }

    /// Committed values under this namespace, in key order.
    pub fn state_values(&mut self) -> Vec<Vec<u8>> {
        let prefix = format!("{}/", self.namespace);
        let mut values = Vec::new();
        for (key, entry) in self.state.range(&prefix) {
            self.results
                .reads
                .entry(key.clone())
                .or_insert(Some(entry.version));
            values.push(entry.value.clone());
        }
        values
    }

    /// Only the last event set during a simulation is kept.
    pub fn set_event(&mut self, name: &str, payload: Vec<u8>) {
        self.results.event = Some(EventRecord {
            name: name.to_string(),
            payload,
        });
    }

    pub fn into_results(self) -> SimulationResults {
        self.results
    }
}

/// Chaincode executed by sandbox peers during simulation.
pub trait Chaincode: Send + Sync {
    fn init(&self, stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError>;

    fn invoke(&self, stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub doc_type: String,
    pub id: String,
    pub project_name: String,
    pub scale: String,
    pub basic_assets: String,
    pub initiator: String,
    pub trustee: String,
    pub depositary: String,
    pub agent: String,
    pub asset_service: String,
    pub assessor: String,
    pub credit_rater: String,
    pub liquidity_supporter: String,
    pub underwriter: String,
    pub lawyer: String,
    pub accountant: String,
    pub creator: String,
    pub last_modifier: String,
    pub create_time: String,
    pub modify_time: String,
}

const PROJECT_DOC_TYPE: &str = "project";

/// Project registry contract used by the sandbox.
#[derive(Debug, Clone, Default)]
pub struct ProjectRegistry;

impl ProjectRegistry {
    fn expect_args(stub: &ChaincodeStub<'_>, count: usize) -> Result<(), ChaincodeError> {
        if stub.args().len() != count {
            return Err(ChaincodeError::IncorrectArguments(count.to_string()));
        }
        Ok(())
    }

    fn load(stub: &mut ChaincodeStub<'_>, id: &str) -> Result<Project, ChaincodeError> {
        stub.get_state(id)
            .and_then(|bytes| serde_json::from_slice::<Project>(&bytes).ok())
            .filter(|project| project.id == id)
            .ok_or_else(|| ChaincodeError::NotFound(id.to_string()))
    }

    fn store(stub: &mut ChaincodeStub<'_>, project: &Project) -> Result<(), ChaincodeError> {
        let bytes = serde_json::to_vec(project)
            .map_err(|e| ChaincodeError::InvalidInput(e.to_string()))?;
        stub.put_state(&project.id, bytes.clone());
        stub.set_event("PutState", bytes);
        Ok(())
    }

    fn create_project(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        Self::expect_args(stub, 1)?;
        let mut project: Project = serde_json::from_str(&stub.args()[0])
            .map_err(|e| ChaincodeError::InvalidInput(e.to_string()))?;
        if project.id.trim().is_empty() {
            return Err(ChaincodeError::InvalidInput("project id is required".to_string()));
        }
        if Self::load(stub, &project.id).is_ok() {
            return Err(ChaincodeError::AlreadyExists(project.id));
        }

        let submitter = stub.submitter().to_string();
        project.doc_type = PROJECT_DOC_TYPE.to_string();
        project.creator = submitter.clone();
        project.last_modifier = submitter;
        if project.create_time.is_empty() {
            project.create_time = stub.timestamp().to_rfc3339();
        }
        project.modify_time = project.create_time.clone();
        Self::store(stub, &project)?;
        Ok(project.id.into_bytes())
    }

    fn get_project_by_id(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        Self::expect_args(stub, 1)?;
        let id = stub.args()[0].clone();
        let project = Self::load(stub, &id)?;
        serde_json::to_vec(&project).map_err(|e| ChaincodeError::InvalidInput(e.to_string()))
    }

    fn query_all_projects(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        Self::expect_args(stub, 0)?;
        let projects: Vec<Project> = stub
            .state_values()
            .iter()
            .filter_map(|bytes| serde_json::from_slice::<Project>(bytes).ok())
            .filter(|project| project.doc_type == PROJECT_DOC_TYPE)
            .collect();
        serde_json::to_vec(&projects).map_err(|e| ChaincodeError::InvalidInput(e.to_string()))
    }

    fn remove_project(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        Self::expect_args(stub, 1)?;
        let id = stub.args()[0].clone();
        let project = Self::load(stub, &id)?;
        if project.creator != stub.submitter() {
            return Err(ChaincodeError::NotCreator(id));
        }
        stub.del_state(&id);
        let payload = serde_json::json!({ "id": id, "docType": PROJECT_DOC_TYPE });
        stub.set_event("DelState", payload.to_string().into_bytes());
        Ok(Vec::new())
    }

    /// Args: id, modify time, then field/value pairs using the JSON field names.
    fn modify_project(stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        let args = stub.args().to_vec();
        if args.len() < 4 {
            return Err(ChaincodeError::IncorrectArguments(
                "greater than 4".to_string(),
            ));
        }
        if args.len() % 2 != 0 {
            return Err(ChaincodeError::IncorrectArguments("even number".to_string()));
        }

        let project = Self::load(stub, &args[0])?;
        let mut fields = serde_json::to_value(&project)
            .map_err(|e| ChaincodeError::InvalidInput(e.to_string()))?;
        for pair in args[2..].chunks(2) {
            let (field, value) = (&pair[0], &pair[1]);
            if matches!(field.as_str(), "id" | "docType" | "creator") {
                return Err(ChaincodeError::InvalidInput(format!(
                    "field '{}' cannot be modified",
                    field
                )));
            }
            match fields.get_mut(field.as_str()) {
                Some(slot) => *slot = serde_json::Value::String(value.clone()),
                None => {
                    return Err(ChaincodeError::InvalidInput(format!(
                        "unknown project field '{}'",
                        field
                    )))
                }
            }
        }

        let mut updated: Project = serde_json::from_value(fields)
            .map_err(|e| ChaincodeError::InvalidInput(e.to_string()))?;
        updated.last_modifier = stub.submitter().to_string();
        updated.modify_time = args[1].clone();
        Self::store(stub, &updated)?;
        Ok(Vec::new())
    }
}

impl Chaincode for ProjectRegistry {
    /// Optional numeric self-test argument is written under `selftest`.
    fn init(&self, stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        if let [arg] = stub.args() {
            if !arg.is_empty() {
                let number: i64 = arg.parse().map_err(|_| {
                    ChaincodeError::InvalidInput(
                        "Expecting a numeric string argument to Init() for instantiate"
                            .to_string(),
                    )
                })?;
                stub.put_state("selftest", number.to_string().into_bytes());
            }
        }
        Ok(Vec::new())
    }

    fn invoke(&self, stub: &mut ChaincodeStub<'_>) -> Result<Vec<u8>, ChaincodeError> {
        match stub.function() {
            "create_project" => Self::create_project(stub),
            "get_project_by_id" => Self::get_project_by_id(stub),
            "query_all_projects" => Self::query_all_projects(stub),
            "remove_project" => Self::remove_project(stub),
            "modify_project" => Self::modify_project(stub),
            other => Err(ChaincodeError::UnknownFunction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        state: &WorldState,
        submitter: &str,
        function: &str,
        args: &[&str],
    ) -> Result<(Vec<u8>, SimulationResults), ChaincodeError> {
        let transient = BTreeMap::new();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut stub = ChaincodeStub::new(
            state,
            "dfn",
            "tx-1",
            submitter,
            Utc::now(),
            function,
            &args,
            &transient,
        );
        let payload = ProjectRegistry.invoke(&mut stub)?;
        Ok((payload, stub.into_results()))
    }

    fn committed(results: &SimulationResults, state: &mut WorldState, block: u64) {
        state.apply(&results.writes, Version { block, tx: 0 });
    }

    #[test]
    fn create_then_read_back() {
        let mut state = WorldState::default();
        let (payload, results) =
            run(&state, "Org1MSP", "create_project", &[r#"{"id":"p-1","projectName":"ABS"}"#])
                .unwrap();
        assert_eq!(payload, b"p-1".to_vec());
        assert_eq!(results.reads.get("dfn/p-1"), Some(&None));
        assert_eq!(results.event.as_ref().map(|e| e.name.as_str()), Some("PutState"));
        committed(&results, &mut state, 1);

        let (payload, _) = run(&state, "Org1MSP", "get_project_by_id", &["p-1"]).unwrap();
        let project: Project = serde_json::from_slice(&payload).unwrap();
        assert_eq!(project.project_name, "ABS");
        assert_eq!(project.doc_type, "project");
        assert_eq!(project.creator, "Org1MSP");

        let err = run(&state, "Org1MSP", "create_project", &[r#"{"id":"p-1"}"#]).unwrap_err();
        assert_eq!(err, ChaincodeError::AlreadyExists("p-1".to_string()));
    }

    #[test]
    fn query_all_lists_projects_in_key_order() {
        let mut state = WorldState::default();
        for (block, id) in [(1, "p-2"), (2, "p-1")] {
            let body = format!(r#"{{"id":"{}"}}"#, id);
            let (_, results) = run(&state, "Org1MSP", "create_project", &[&body]).unwrap();
            committed(&results, &mut state, block);
        }

        let (payload, _) = run(&state, "Org1MSP", "query_all_projects", &[]).unwrap();
        let projects: Vec<Project> = serde_json::from_slice(&payload).unwrap();
        let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p-1", "p-2"]);
    }

    #[test]
    fn only_creator_removes() {
        let mut state = WorldState::default();
        let (_, results) = run(&state, "Org1MSP", "create_project", &[r#"{"id":"p-1"}"#]).unwrap();
        committed(&results, &mut state, 1);

        let err = run(&state, "Org2MSP", "remove_project", &["p-1"]).unwrap_err();
        assert_eq!(err, ChaincodeError::NotCreator("p-1".to_string()));

        let (_, results) = run(&state, "Org1MSP", "remove_project", &["p-1"]).unwrap();
        assert_eq!(results.writes.get("dfn/p-1"), Some(&None));
        assert_eq!(results.event.unwrap().name, "DelState");
    }

    #[test]
    fn modify_updates_named_fields() {
        let mut state = WorldState::default();
        let (_, results) = run(&state, "Org1MSP", "create_project", &[r#"{"id":"p-1"}"#]).unwrap();
        committed(&results, &mut state, 1);

        let (_, results) = run(
            &state,
            "Org2MSP",
            "modify_project",
            &["p-1", "2024-01-01", "trustee", "Bank A"],
        )
        .unwrap();
        committed(&results, &mut state, 2);
        let (payload, _) = run(&state, "Org1MSP", "get_project_by_id", &["p-1"]).unwrap();
        let project: Project = serde_json::from_slice(&payload).unwrap();
        assert_eq!(project.trustee, "Bank A");
        assert_eq!(project.last_modifier, "Org2MSP");
        assert_eq!(project.modify_time, "2024-01-01");

        assert!(run(&state, "Org1MSP", "modify_project", &["p-1", "t", "nope", "x"]).is_err());
        assert!(run(&state, "Org1MSP", "modify_project", &["p-1", "t", "id", "x"]).is_err());
        assert!(run(&state, "Org1MSP", "modify_project", &["p-1", "t", "trustee"]).is_err());
    }

    #[test]
    fn init_writes_selftest_value() {
        let state = WorldState::default();
        let transient = BTreeMap::new();
        let args = vec!["666666".to_string()];
        let mut stub = ChaincodeStub::new(
            &state,
            "dfn",
            "tx-1",
            "Org1MSP",
            Utc::now(),
            "init",
            &args,
            &transient,
        );
        ProjectRegistry.init(&mut stub).unwrap();
        let results = stub.into_results();
        assert_eq!(
            results.writes.get("dfn/selftest"),
            Some(&Some(b"666666".to_vec()))
        );

        let args = vec!["abc".to_string()];
        let mut stub = ChaincodeStub::new(
            &state,
            "dfn",
            "tx-2",
            "Org1MSP",
            Utc::now(),
            "init",
            &args,
            &transient,
        );
        assert!(ProjectRegistry.init(&mut stub).is_err());
    }

    #[test]
    fn unknown_function_is_rejected() {
        let state = WorldState::default();
        let err = run(&state, "Org1MSP", "drop_tables", &[]).unwrap_err();
        assert!(err.to_string().contains("drop_tables"));
    }
}
