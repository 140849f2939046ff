//! In-memory simulation of one or more arrays behind the management API.
//!
//! Every clone shares the same world, so clients for a local and a partner
//! array can be built from the same simulator and observe each other's
//! replication effects. Mutating requests are answered with a job handle
//! that reports its final state on the first poll.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arrayctl::{
    ApiRequest, ApiResponse, ArrayClient, ClientSettings, Method, Transport, TransportFuture,
};
use serde_json::{Value, json};

/// Failure surfaced either as an HTTP error or as a failed job.
enum Failure {
    Http(u16, String),
    Job(String),
}

type Outcome<T> = Result<T, Failure>;

fn bad(message: impl Into<String>) -> Failure {
    Failure::Http(400, message.into())
}

fn missing(kind: &str, name: &str) -> Failure {
    Failure::Http(404, format!("{kind} {name} cannot be found"))
}

fn conflict(kind: &str, name: &str) -> Failure {
    Failure::Http(409, format!("{kind} {name} already exists"))
}

fn error_response(status: u16, message: &str) -> ApiResponse {
    ApiResponse::new(status, json!({ "message": message }))
}

fn read(result: Outcome<Value>) -> ApiResponse {
    match result {
        Ok(body) => ApiResponse::new(200, body),
        Err(Failure::Http(status, message)) => error_response(status, &message),
        Err(Failure::Job(message)) => error_response(500, &message),
    }
}

fn text(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn number(body: &Value, pointer: &str) -> Option<u64> {
    body.pointer(pointer).and_then(|value| {
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|raw| raw.parse().ok()))
    })
}

fn names(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.as_str()
                        .map(str::to_owned)
                        .or_else(|| text(item, "/name"))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Clone)]
struct Protection {
    rdf_group: u32,
    remote_array: String,
    remote_group: String,
    mode: String,
    state: String,
}

#[derive(Default)]
struct Group {
    srp: Option<String>,
    slo: Option<String>,
    workload: Option<String>,
    volumes: Vec<String>,
    protection: Option<Protection>,
}

struct View {
    host: String,
    port_group: String,
    storage_group: String,
}

#[derive(Clone)]
struct Pair {
    rdf_group: u32,
    remote_array: String,
    remote_volume: String,
    remote_rdf_group: u32,
    mode: String,
    role: &'static str,
}

struct Device {
    name: String,
    cap_gb: u32,
    allocated: bool,
    pair: Option<Pair>,
}

struct Generation {
    timestamp: String,
    links: BTreeSet<String>,
}

#[derive(Clone)]
struct RdfLink {
    label: String,
    remote_array: String,
    remote_number: u32,
}

#[derive(Default)]
struct ArrayState {
    groups: BTreeMap<String, Group>,
    hosts: BTreeMap<String, Vec<String>>,
    port_groups: BTreeMap<String, Value>,
    views: BTreeMap<String, View>,
    volumes: BTreeMap<String, Device>,
    snapshots: BTreeMap<(String, String), Vec<Generation>>,
    rdf_groups: BTreeMap<u32, RdfLink>,
}

impl ArrayState {
    fn groups_of(&self, id: &str) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, group)| group.volumes.iter().any(|member| member == id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn views_of(&self, predicate: impl Fn(&View) -> bool) -> Vec<String> {
        self.views
            .iter()
            .filter(|(_, view)| predicate(view))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn is_snapshot_source(&self, id: &str) -> bool {
        self.snapshots.keys().any(|(source, _)| source == id)
    }

    fn is_linked_target(&self, id: &str) -> bool {
        self.snapshots
            .values()
            .flatten()
            .any(|generation| generation.links.contains(id))
    }

    fn group_body(&self, name: &str, group: &Group) -> Value {
        let capacity: u32 = group
            .volumes
            .iter()
            .filter_map(|id| self.volumes.get(id))
            .map(|device| device.cap_gb)
            .sum();
        json!({
            "storageGroupId": name,
            "srp": group.srp,
            "slo": group.slo,
            "workload": group.workload,
            "num_of_vols": group.volumes.len(),
            "cap_gb": f64::from(capacity),
            "maskingview": self.views_of(|view| view.storage_group == name),
            "unprotected": group.protection.is_none(),
        })
    }

    fn volume_body(&self, id: &str, device: &Device) -> Value {
        let rdf_groups: Vec<Value> = device
            .pair
            .iter()
            .map(|pair| json!({ "rdf_group_number": pair.rdf_group }))
            .collect();
        let device_type = device
            .pair
            .as_ref()
            .map_or_else(|| String::from("TDEV"), |pair| format!("{}+TDEV", pair.role));
        json!({
            "volumeId": id,
            "volume_identifier": device.name,
            "cap_gb": f64::from(device.cap_gb),
            "storageGroupId": self.groups_of(id),
            "snapvx_source": self.is_snapshot_source(id),
            "snapvx_target": self.is_linked_target(id),
            "rdfGroupId": rdf_groups,
            "type": device_type,
        })
    }
}

struct Fault {
    method: Method,
    fragment: String,
    status: u16,
    message: String,
}

#[derive(Default)]
struct World {
    arrays: BTreeMap<String, ArrayState>,
    jobs: BTreeMap<String, Value>,
    next_job: u64,
    next_device: u32,
    clock: u64,
    faults: VecDeque<Fault>,
    log: Vec<ApiRequest>,
}

/// Shared handle on the simulated arrays.
#[derive(Clone, Default)]
pub struct ArraySimulator {
    world: Arc<Mutex<World>>,
}

impl ArraySimulator {
    /// Creates a simulator managing the given arrays.
    pub fn with_arrays(arrays: &[&str]) -> Self {
        let simulator = Self::default();
        {
            let mut world = simulator.world();
            for array in arrays {
                world.arrays.insert((*array).to_owned(), ArrayState::default());
            }
        }
        simulator
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds a client for `array` with a fast poller.
    pub fn client(&self, array: &str) -> ArrayClient<Self> {
        ArrayClient::new(self.clone(), array).with_settings(ClientSettings {
            job_poll_interval: Duration::from_millis(1),
            job_timeout: Duration::from_secs(2),
            ..ClientSettings::default()
        })
    }

    /// Configures RDF group `number` between `local` and `remote` on both
    /// sides.
    pub fn link_arrays(&self, local: &str, remote: &str, number: u32, label: &str) {
        let mut world = self.world();
        for (from, to) in [(local, remote), (remote, local)] {
            world
                .arrays
                .entry(from.to_owned())
                .or_default()
                .rdf_groups
                .insert(
                    number,
                    RdfLink {
                        label: label.to_owned(),
                        remote_array: to.to_owned(),
                        remote_number: number,
                    },
                );
        }
    }

    /// Makes the next request with `method` whose path contains `fragment`
    /// fail with `status` and `message`.
    pub fn fail_next(&self, method: Method, fragment: &str, status: u16, message: &str) {
        self.world().faults.push_back(Fault {
            method,
            fragment: fragment.to_owned(),
            status,
            message: message.to_owned(),
        });
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.world().log.clone()
    }

    /// Returns `true` when `array` holds a volume with identifier `id`.
    pub fn has_volume(&self, array: &str, id: &str) -> bool {
        self.world()
            .arrays
            .get(array)
            .is_some_and(|state| state.volumes.contains_key(id))
    }

    /// Number of storage groups on `array`.
    pub fn storage_group_count(&self, array: &str) -> usize {
        self.world()
            .arrays
            .get(array)
            .map_or(0, |state| state.groups.len())
    }

    /// Number of jobs created so far.
    pub fn job_count(&self) -> usize {
        self.world().jobs.len()
    }
}

impl Transport for ArraySimulator {
    fn invoke<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a, ApiResponse> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(self.world().handle(request))
        })
    }
}

impl World {
    fn handle(&mut self, request: &ApiRequest) -> ApiResponse {
        self.log.push(request.clone());
        let fault_index = self.faults.iter().position(|fault| {
            fault.method == request.method && request.path.contains(&fault.fragment)
        });
        if let Some(fault) = fault_index.and_then(|index| self.faults.remove(index)) {
            return error_response(fault.status, &fault.message);
        }

        let segments: Vec<&str> = request.path.split('/').collect();
        match segments.as_slice() {
            [_, "system", "job", id] => read(
                self.jobs
                    .get(*id)
                    .cloned()
                    .ok_or_else(|| missing("job", id)),
            ),
            [_, "sloprovisioning", "symmetrix", array, rest @ ..] => {
                if !self.arrays.contains_key(*array) {
                    return error_response(404, &format!("array {array} is not managed"));
                }
                self.provisioning(request, array, rest)
            }
            [_, "replication", "symmetrix", array, rest @ ..] => {
                if !self.arrays.contains_key(*array) {
                    return error_response(404, &format!("array {array} is not managed"));
                }
                self.replication(request, array, rest)
            }
            _ => error_response(404, "unknown resource"),
        }
    }

    fn state(&mut self, array: &str) -> &mut ArrayState {
        self.arrays.entry(array.to_owned()).or_default()
    }

    fn respond_job(&mut self, result: Outcome<()>) -> ApiResponse {
        let (status, message) = match result {
            Ok(()) => ("SUCCEEDED", String::from("Succeeded")),
            Err(Failure::Job(message)) => ("FAILED", message),
            Err(Failure::Http(code, message)) => return error_response(code, &message),
        };
        self.next_job += 1;
        let id = self.next_job.to_string();
        self.jobs.insert(
            id.clone(),
            json!({
                "jobId": id,
                "name": "simulated task",
                "status": status,
                "result": message,
                "completed_date_milliseconds": 1_700_000_000_000_u64 + self.next_job,
            }),
        );
        ApiResponse::new(202, json!({ "jobId": id, "status": "SCHEDULED" }))
    }

    fn respond_deleted(result: Outcome<()>) -> ApiResponse {
        match result {
            Ok(()) => ApiResponse::new(204, Value::Null),
            Err(Failure::Http(status, message)) => error_response(status, &message),
            Err(Failure::Job(message)) => error_response(400, &message),
        }
    }

    fn new_device(&mut self, array: &str, name: &str, cap_gb: u32, group: &str) -> String {
        self.next_device += 1;
        let id = format!("{:05X}", 0x100 + self.next_device);
        let state = self.state(array);
        state.volumes.insert(
            id.clone(),
            Device {
                name: name.to_owned(),
                cap_gb,
                allocated: true,
                pair: None,
            },
        );
        if let Some(target) = state.groups.get_mut(group) {
            target.volumes.push(id.clone());
        }
        id
    }

    // ---- provisioning -------------------------------------------------------

    fn provisioning(&mut self, request: &ApiRequest, array: &str, rest: &[&str]) -> ApiResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        match (request.method, rest) {
            (Method::Get, ["storagegroup"]) => {
                let listed: Vec<&String> = self.state(array).groups.keys().collect();
                read(Ok(json!({ "storageGroupId": listed })))
            }
            (Method::Get, ["storagegroup", name]) => {
                let state = self.state(array);
                read(
                    state
                        .groups
                        .get(*name)
                        .map(|group| state.group_body(name, group))
                        .ok_or_else(|| missing("Storage Group", name)),
                )
            }
            (Method::Post, ["storagegroup"]) => {
                let result = self.create_group(array, &body);
                self.respond_job(result)
            }
            (Method::Put, ["storagegroup", name]) => {
                let result = self.edit_group(array, name, &body);
                self.respond_job(result)
            }
            (Method::Delete, ["storagegroup", name]) => {
                Self::respond_deleted(self.delete_group(array, name))
            }
            (Method::Get, ["host"]) => {
                let listed: Vec<&String> = self.state(array).hosts.keys().collect();
                read(Ok(json!({ "hostId": listed })))
            }
            (Method::Get, ["host", name]) => {
                let state = self.state(array);
                read(
                    state
                        .hosts
                        .get(*name)
                        .map(|initiators| {
                            json!({
                                "hostId": name,
                                "initiator": initiators,
                                "num_of_initiators": initiators.len(),
                                "maskingview": state.views_of(|view| view.host == *name),
                            })
                        })
                        .ok_or_else(|| missing("Host", name)),
                )
            }
            (Method::Post, ["host"]) => {
                let result = self.create_host(array, &body);
                self.respond_job(result)
            }
            (Method::Delete, ["host", name]) => {
                let state = self.state(array);
                let result = if !state.hosts.contains_key(*name) {
                    Err(missing("Host", name))
                } else if !state.views_of(|view| view.host == *name).is_empty() {
                    Err(bad(format!("Host {name} is part of a masking view")))
                } else {
                    state.hosts.remove(*name);
                    Ok(())
                };
                Self::respond_deleted(result)
            }
            (Method::Get, ["portgroup"]) => {
                let listed: Vec<&String> = self.state(array).port_groups.keys().collect();
                read(Ok(json!({ "portGroupId": listed })))
            }
            (Method::Get, ["portgroup", name]) => {
                let state = self.state(array);
                read(
                    state
                        .port_groups
                        .get(*name)
                        .map(|ports| {
                            json!({
                                "portGroupId": name,
                                "symmetrixPortKey": ports,
                                "maskingview": state.views_of(|view| view.port_group == *name),
                            })
                        })
                        .ok_or_else(|| missing("Port Group", name)),
                )
            }
            (Method::Post, ["portgroup"]) => {
                let state = self.state(array);
                let result = match text(&body, "/portGroupId") {
                    None => Err(bad("portGroupId is required")),
                    Some(name) if state.port_groups.contains_key(&name) => {
                        Err(conflict("Port Group", &name))
                    }
                    Some(name) => {
                        let ports = body.get("symmetrixPortKey").cloned().unwrap_or(json!([]));
                        state.port_groups.insert(name, ports);
                        Ok(())
                    }
                };
                self.respond_job(result)
            }
            (Method::Delete, ["portgroup", name]) => {
                let state = self.state(array);
                let result = if !state.port_groups.contains_key(*name) {
                    Err(missing("Port Group", name))
                } else if !state.views_of(|view| view.port_group == *name).is_empty() {
                    Err(bad(format!("Port Group {name} is part of a masking view")))
                } else {
                    state.port_groups.remove(*name);
                    Ok(())
                };
                Self::respond_deleted(result)
            }
            (Method::Get, ["maskingview"]) => {
                let filter = request.query_value("storage_group_name").map(str::to_owned);
                let state = self.state(array);
                let listed = state.views_of(|view| {
                    filter
                        .as_deref()
                        .is_none_or(|group| view.storage_group == group)
                });
                read(Ok(json!({ "maskingViewId": listed })))
            }
            (Method::Get, ["maskingview", name]) => read(
                self.state(array)
                    .views
                    .get(*name)
                    .map(|view| {
                        json!({
                            "maskingViewId": name,
                            "hostId": view.host,
                            "portGroupId": view.port_group,
                            "storageGroupId": view.storage_group,
                        })
                    })
                    .ok_or_else(|| missing("Masking View", name)),
            ),
            (Method::Post, ["maskingview"]) => {
                let result = self.create_view(array, &body);
                self.respond_job(result)
            }
            (Method::Delete, ["maskingview", name]) => {
                let state = self.state(array);
                let result = state
                    .views
                    .remove(*name)
                    .map(|_| ())
                    .ok_or_else(|| missing("Masking View", name));
                Self::respond_deleted(result)
            }
            (Method::Get, ["initiator"]) => {
                let wanted = request.query_value("initiator_hba").unwrap_or_default();
                let found: Vec<&String> = self
                    .state(array)
                    .hosts
                    .values()
                    .flatten()
                    .filter(|initiator| initiator.as_str() == wanted)
                    .collect();
                read(Ok(json!({ "initiatorId": found })))
            }
            (Method::Get, ["initiator", id]) => read(
                self.state(array)
                    .hosts
                    .iter()
                    .find(|(_, initiators)| initiators.iter().any(|member| member == *id))
                    .map(|(host, _)| json!({ "initiatorId": id, "host": host }))
                    .ok_or_else(|| missing("Initiator", id)),
            ),
            (Method::Get, ["volume"]) => {
                let name = request.query_value("volume_identifier");
                let group = request.query_value("storageGroupId");
                let state = self.state(array);
                let results: Vec<Value> = state
                    .volumes
                    .iter()
                    .filter(|(_, device)| name.is_none_or(|wanted| device.name == wanted))
                    .filter(|(id, _)| {
                        group.is_none_or(|wanted| {
                            state
                                .groups
                                .get(wanted)
                                .is_some_and(|members| members.volumes.contains(*id))
                        })
                    })
                    .map(|(id, _)| json!({ "volumeId": id }))
                    .collect();
                read(Ok(json!({
                    "count": results.len(),
                    "resultList": { "result": results },
                })))
            }
            (Method::Get, ["volume", id]) => {
                let state = self.state(array);
                read(
                    state
                        .volumes
                        .get(*id)
                        .map(|device| state.volume_body(id, device))
                        .ok_or_else(|| missing("Volume", id)),
                )
            }
            (Method::Put, ["volume", id]) => {
                let result = self.edit_volume(array, id, &body);
                self.respond_job(result)
            }
            (Method::Delete, ["volume", id]) => {
                Self::respond_deleted(self.delete_volume(array, id))
            }
            _ => error_response(404, "unknown resource"),
        }
    }

    fn create_group(&mut self, array: &str, body: &Value) -> Outcome<()> {
        let name = text(body, "/storageGroupId").ok_or_else(|| bad("storageGroupId is required"))?;
        let state = self.state(array);
        if state.groups.contains_key(&name) {
            return Err(conflict("Storage Group", &name));
        }
        let policy = |pointer: &str| text(body, pointer).filter(|value| value != "None");
        state.groups.insert(
            name,
            Group {
                srp: policy("/srpId"),
                slo: policy("/sloBasedStorageGroupParam/0/sloId"),
                workload: policy("/sloBasedStorageGroupParam/0/workloadSelection"),
                ..Group::default()
            },
        );
        Ok(())
    }

    fn delete_group(&mut self, array: &str, name: &str) -> Outcome<()> {
        let state = self.state(array);
        if !state.groups.contains_key(name) {
            return Err(missing("Storage Group", name));
        }
        if !state.views_of(|view| view.storage_group == name).is_empty() {
            return Err(bad(format!("Storage Group {name} is part of a masking view")));
        }
        state.groups.remove(name);
        Ok(())
    }

    fn create_host(&mut self, array: &str, body: &Value) -> Outcome<()> {
        let name = text(body, "/hostId").ok_or_else(|| bad("hostId is required"))?;
        let initiators = names(body.get("initiatorId"));
        let state = self.state(array);
        if state.hosts.contains_key(&name) {
            return Err(conflict("Host", &name));
        }
        for initiator in &initiators {
            if let Some((owner, _)) = state
                .hosts
                .iter()
                .find(|(_, owned)| owned.contains(initiator))
            {
                return Err(bad(format!(
                    "Initiator {initiator} is already in use by host {owner}"
                )));
            }
        }
        state.hosts.insert(name, initiators);
        Ok(())
    }

    fn create_view(&mut self, array: &str, body: &Value) -> Outcome<()> {
        let name = text(body, "/maskingViewId").ok_or_else(|| bad("maskingViewId is required"))?;
        let host = text(body, "/hostOrHostGroupSelection/useExistingHostParam/hostId")
            .ok_or_else(|| bad("host selection is required"))?;
        let port_group = text(body, "/portGroupSelection/useExistingPortGroupParam/portGroupId")
            .ok_or_else(|| bad("port group selection is required"))?;
        let storage_group = text(
            body,
            "/storageGroupSelection/useExistingStorageGroupParam/storageGroupId",
        )
        .ok_or_else(|| bad("storage group selection is required"))?;
        let state = self.state(array);
        if state.views.contains_key(&name) {
            return Err(conflict("Masking View", &name));
        }
        if !state.hosts.contains_key(&host) {
            return Err(bad(format!("Cannot use host {host}: it does not exist")));
        }
        if !state.port_groups.contains_key(&port_group) {
            return Err(bad(format!("Cannot use port group {port_group}: it does not exist")));
        }
        if !state.groups.contains_key(&storage_group) {
            return Err(bad(format!(
                "Cannot use storage group {storage_group}: it does not exist"
            )));
        }
        state.views.insert(
            name,
            View {
                host,
                port_group,
                storage_group,
            },
        );
        Ok(())
    }

    fn edit_group(&mut self, array: &str, group: &str, body: &Value) -> Outcome<()> {
        if !self.state(array).groups.contains_key(group) {
            return Err(missing("Storage Group", group));
        }
        let action = body
            .get("editStorageGroupActionParam")
            .cloned()
            .unwrap_or(Value::Null);
        if let Some(add) = action.pointer("/expandStorageGroupParam/addVolumeParam") {
            let attributes = add.pointer("/volumeAttributes/0").cloned().unwrap_or(Value::Null);
            let size = number(&attributes, "/volume_size")
                .and_then(|raw| u32::try_from(raw).ok())
                .filter(|size| *size > 0)
                .ok_or_else(|| bad("volume_size must be a positive number of GB"))?;
            let count = number(&attributes, "/num_of_vols").unwrap_or(1);
            let name = text(&attributes, "/volumeIdentifier/identifier_name").unwrap_or_default();
            let remote = self.remote_target(array, group, add.get("remoteSymmSGInfoParam"))?;
            for _ in 0..count {
                let id = self.new_device(array, &name, size, group);
                if let Some((protection, remote_group)) = &remote {
                    self.pair_with_new_partner(array, &id, protection, remote_group);
                }
            }
            return Ok(());
        }
        if let Some(add) = action.pointer("/expandStorageGroupParam/addSpecificVolumeParam") {
            let ids = names(add.get("volumeId"));
            let remote = self.remote_target(array, group, add.get("remoteSymmSGInfoParam"))?;
            for id in &ids {
                if !self.state(array).volumes.contains_key(id) {
                    return Err(missing("Volume", id));
                }
            }
            for id in ids {
                let state = self.state(array);
                if let Some(target) = state.groups.get_mut(group)
                    && !target.volumes.contains(&id)
                {
                    target.volumes.push(id.clone());
                }
                if let Some((protection, remote_group)) = &remote {
                    self.pair_with_new_partner(array, &id, protection, remote_group);
                }
            }
            return Ok(());
        }
        if let Some(remove) = action.get("removeVolumeParam") {
            let ids = names(remove.get("volumeId"));
            let has_remote = remove.get("remoteSymmSGInfoParam").is_some();
            let state = self.state(array);
            let protected = state
                .groups
                .get(group)
                .and_then(|target| target.protection.clone());
            for id in &ids {
                let member = state
                    .groups
                    .get(group)
                    .is_some_and(|target| target.volumes.contains(id));
                if !member {
                    return Err(Failure::Job(format!(
                        "Volume {id} is not a member of storage group {group}"
                    )));
                }
                if protected.is_some() && !has_remote {
                    return Err(bad(format!(
                        "Storage group {group} is protected; remote storage group details are required"
                    )));
                }
            }
            for id in ids {
                if let Some(target) = self.state(array).groups.get_mut(group) {
                    target.volumes.retain(|member| *member != id);
                }
                if protected.is_some() {
                    self.unpair(array, &id);
                }
            }
            return Ok(());
        }
        Err(bad("unsupported storage group action"))
    }

    /// Validates the remote half of a membership change against the
    /// group's protection.
    fn remote_target(
        &mut self,
        array: &str,
        group: &str,
        remote: Option<&Value>,
    ) -> Outcome<Option<(Protection, String)>> {
        let Some(remote) = remote else {
            return Ok(None);
        };
        let protection = self
            .state(array)
            .groups
            .get(group)
            .and_then(|target| target.protection.clone())
            .ok_or_else(|| bad(format!("Storage group {group} is not protected")))?;
        let remote_array = text(remote, "/remote_symmetrix_1_id").unwrap_or_default();
        let remote_group = text(remote, "/remote_symmetrix_1_sgs/0").unwrap_or_default();
        if remote_array != protection.remote_array || remote_group != protection.remote_group {
            return Err(bad(format!(
                "Remote storage group {remote_group} on {remote_array} does not protect {group}"
            )));
        }
        Ok(Some((protection, remote_group)))
    }

    fn pair_with_new_partner(
        &mut self,
        array: &str,
        id: &str,
        protection: &Protection,
        remote_group: &str,
    ) {
        let (name, size) = self
            .state(array)
            .volumes
            .get(id)
            .map(|device| (device.name.clone(), device.cap_gb))
            .unwrap_or_default();
        let remote_rdf_group = self
            .state(array)
            .rdf_groups
            .get(&protection.rdf_group)
            .map_or(protection.rdf_group, |link| link.remote_number);
        let partner = self.new_device(&protection.remote_array, &name, size, remote_group);
        if let Some(device) = self.state(array).volumes.get_mut(id) {
            device.pair = Some(Pair {
                rdf_group: protection.rdf_group,
                remote_array: protection.remote_array.clone(),
                remote_volume: partner.clone(),
                remote_rdf_group,
                mode: protection.mode.clone(),
                role: "RDF1",
            });
        }
        if let Some(device) = self.state(&protection.remote_array).volumes.get_mut(&partner) {
            device.pair = Some(Pair {
                rdf_group: remote_rdf_group,
                remote_array: array.to_owned(),
                remote_volume: id.to_owned(),
                remote_rdf_group: protection.rdf_group,
                mode: protection.mode.clone(),
                role: "RDF2",
            });
        }
    }

    fn unpair(&mut self, array: &str, id: &str) {
        let Some(pair) = self
            .state(array)
            .volumes
            .get_mut(id)
            .and_then(|device| device.pair.take())
        else {
            return;
        };
        let remote = self.state(&pair.remote_array);
        if let Some(device) = remote.volumes.get_mut(&pair.remote_volume) {
            device.pair = None;
        }
        for group in remote.groups.values_mut() {
            group.volumes.retain(|member| *member != pair.remote_volume);
        }
    }

    fn edit_volume(&mut self, array: &str, id: &str, body: &Value) -> Outcome<()> {
        let state = self.state(array);
        let device = state.volumes.get_mut(id).ok_or_else(|| missing("Volume", id))?;
        let action = body.get("editVolumeActionParam").cloned().unwrap_or(Value::Null);
        if let Some(name) = text(
            &action,
            "/modifyVolumeIdentifierParam/volumeIdentifier/identifier_name",
        ) {
            device.name = name;
            return Ok(());
        }
        if let Some(size) = number(&action, "/expandVolumeParam/volumeAttribute/volume_size") {
            let requested = u32::try_from(size).map_err(|_| bad("volume_size is too large"))?;
            if requested <= device.cap_gb {
                return Err(Failure::Job(format!(
                    "New size for device {id} must be larger than the current size"
                )));
            }
            device.cap_gb = requested;
            return Ok(());
        }
        if action.pointer("/freeVolumeParam/free_volume") == Some(&json!(true)) {
            if !device.allocated {
                return Err(Failure::Job(format!(
                    "Device {id} is already in the requested state"
                )));
            }
            device.allocated = false;
            return Ok(());
        }
        Err(bad("unsupported volume action"))
    }

    fn delete_volume(&mut self, array: &str, id: &str) -> Outcome<()> {
        let state = self.state(array);
        let Some(device) = state.volumes.get(id) else {
            return Err(missing("Volume", id));
        };
        if !state.groups_of(id).is_empty() {
            return Err(bad(format!("Device {id} is a member of a storage group")));
        }
        if device.pair.is_some() {
            return Err(bad(format!("Device {id} is an RDF device")));
        }
        if device.allocated {
            return Err(bad(format!("Device {id} must be deallocated before deletion")));
        }
        if state.is_snapshot_source(id) || state.is_linked_target(id) {
            return Err(bad(format!("Device {id} has snapshot sessions")));
        }
        state.volumes.remove(id);
        Ok(())
    }

    // ---- replication ---------------------------------------------------------

    fn replication(&mut self, request: &ApiRequest, array: &str, rest: &[&str]) -> ApiResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        match (request.method, rest) {
            (Method::Post, ["snapshot", name]) => {
                let result = self.create_snapshot(array, name, &body);
                self.respond_job(result)
            }
            (Method::Put, ["snapshot", name, "generation", generation]) => {
                let result = parse_generation(generation)
                    .and_then(|number| self.modify_snapshot(array, name, number, &body));
                self.respond_job(result)
            }
            (Method::Delete, ["snapshot", name, "generation", generation]) => {
                let result = parse_generation(generation)
                    .and_then(|number| self.delete_snapshot(array, name, number, &body));
                self.respond_job(result)
            }
            (Method::Get, ["volume", id, "snapshot"]) => {
                let state = self.state(array);
                if !state.volumes.contains_key(*id) {
                    return read(Err(missing("Volume", id)));
                }
                let listed: Vec<&String> = state
                    .snapshots
                    .keys()
                    .filter(|(source, _)| source.as_str() == *id)
                    .map(|(_, name)| name)
                    .collect();
                read(Ok(json!({ "snapshotName": listed })))
            }
            (Method::Get, ["volume", id, "snapshot", name]) => read(
                self.state(array)
                    .snapshots
                    .get(&((*id).to_owned(), (*name).to_owned()))
                    .map(|generations| {
                        json!({
                            "snapshotName": name,
                            "deviceName": id,
                            "generationCount": generations.len(),
                        })
                    })
                    .ok_or_else(|| missing("Snapshot", name)),
            ),
            (Method::Get, ["volume", id, "snapshot", name, "generation"]) => read(
                self.state(array)
                    .snapshots
                    .get(&((*id).to_owned(), (*name).to_owned()))
                    .map(|generations| {
                        json!({ "generation": (0..generations.len()).collect::<Vec<_>>() })
                    })
                    .ok_or_else(|| missing("Snapshot", name)),
            ),
            (Method::Get, ["volume", id, "snapshot", name, "generation", generation]) => {
                let state = self.state(array);
                let result = parse_generation(generation).and_then(|number| {
                    state
                        .snapshots
                        .get(&((*id).to_owned(), (*name).to_owned()))
                        .and_then(|generations| generations.get(number))
                        .map(|entry| {
                            let links: Vec<Value> = entry
                                .links
                                .iter()
                                .map(|target| {
                                    json!({
                                        "targetDevice": target,
                                        "linked": true,
                                        "copy": false,
                                        "defined": true,
                                    })
                                })
                                .collect();
                            json!({
                                "snapshotName": name,
                                "deviceName": id,
                                "generation": number,
                                "timestamp": entry.timestamp,
                                "linkedDevices": links,
                            })
                        })
                        .ok_or_else(|| missing("Snapshot generation", generation))
                });
                read(result)
            }
            (Method::Get, ["rdf_group"]) => {
                let groups: Vec<Value> = self
                    .state(array)
                    .rdf_groups
                    .iter()
                    .map(|(number, link)| json!({ "rdfgNumber": number, "label": link.label }))
                    .collect();
                read(Ok(json!({ "rdfGroupID": groups })))
            }
            (Method::Get, ["rdf_group", number]) => {
                let state = self.state(array);
                let result = number
                    .parse::<u32>()
                    .ok()
                    .and_then(|parsed| state.rdf_groups.get(&parsed).map(|link| (parsed, link)))
                    .map(|(parsed, link)| {
                        let devices = state
                            .volumes
                            .values()
                            .filter(|device| {
                                device.pair.as_ref().is_some_and(|pair| pair.rdf_group == parsed)
                            })
                            .count();
                        json!({
                            "rdfgNumber": parsed,
                            "label": link.label,
                            "remoteSymmetrix": link.remote_array,
                            "remoteRdfgNumber": link.remote_number,
                            "numDevices": devices,
                            "modes": ["Synchronous"],
                        })
                    })
                    .ok_or_else(|| missing("RDF group", number));
                read(result)
            }
            (Method::Get, ["rdf_group", number, "volume", id]) => {
                let state = self.state(array);
                let result = state
                    .volumes
                    .get(*id)
                    .and_then(|device| device.pair.as_ref())
                    .filter(|pair| pair.rdf_group.to_string() == *number)
                    .map(|pair| {
                        let pair_state = state
                            .groups
                            .values()
                            .filter(|group| group.volumes.iter().any(|member| member == *id))
                            .find_map(|group| group.protection.as_ref())
                            .map_or_else(|| String::from("Synchronized"), |protection| {
                                protection.state.clone()
                            });
                        json!({
                            "localVolumeName": id,
                            "remoteVolumeName": pair.remote_volume,
                            "remoteSymmetrixId": pair.remote_array,
                            "rdfpairState": pair_state,
                            "rdfMode": pair.mode,
                            "localRdfGroupNumber": pair.rdf_group,
                            "remoteRdfGroupNumber": pair.remote_rdf_group,
                        })
                    })
                    .ok_or_else(|| missing("RDF device pair", id));
                read(result)
            }
            (Method::Post, ["storagegroup", group, "rdf_group"]) => {
                let result = self.protect_group(array, group, &body);
                self.respond_job(result)
            }
            (Method::Get, ["storagegroup", group, "rdf_group", number]) => {
                let state = self.state(array);
                let result = state
                    .groups
                    .get(*group)
                    .and_then(|target| target.protection.as_ref())
                    .filter(|protection| protection.rdf_group.to_string() == *number)
                    .map(|protection| {
                        json!({
                            "storageGroupName": group,
                            "symmetrixId": array,
                            "rdfGroupNumber": protection.rdf_group,
                            "states": [protection.state],
                            "modes": [protection.mode],
                        })
                    })
                    .ok_or_else(|| missing("Storage group replication", group));
                read(result)
            }
            (Method::Put, ["storagegroup", group, "rdf_group", number]) => {
                let result = self.replication_action(array, group, number, &body);
                self.respond_job(result)
            }
            _ => error_response(404, "unknown resource"),
        }
    }

    fn create_snapshot(&mut self, array: &str, name: &str, body: &Value) -> Outcome<()> {
        let sources = names(body.get("deviceNameListSource"));
        if sources.is_empty() {
            return Err(bad("at least one source device is required"));
        }
        self.clock += 1;
        let timestamp = (1_760_000_000_u64 + self.clock).to_string();
        let state = self.state(array);
        if let Some(source) = sources.iter().find(|id| !state.volumes.contains_key(*id)) {
            return Err(missing("Volume", source));
        }
        for source in sources {
            state
                .snapshots
                .entry((source, name.to_owned()))
                .or_default()
                .insert(
                    0,
                    Generation {
                        timestamp: timestamp.clone(),
                        links: BTreeSet::new(),
                    },
                );
        }
        Ok(())
    }

    fn modify_snapshot(
        &mut self,
        array: &str,
        name: &str,
        generation: usize,
        body: &Value,
    ) -> Outcome<()> {
        let sources = names(body.get("deviceNameListSource"));
        let targets = names(body.get("deviceNameListTarget"));
        let action = text(body, "/action").unwrap_or_default();
        let state = self.state(array);
        for source in &sources {
            let exists = state
                .snapshots
                .get(&(source.clone(), name.to_owned()))
                .is_some_and(|generations| generation < generations.len());
            if !exists {
                return Err(missing("Snapshot", name));
            }
        }
        match action.as_str() {
            "Link" => {
                if let Some(target) = targets.iter().find(|id| !state.volumes.contains_key(*id)) {
                    return Err(missing("Volume", target));
                }
                for source in &sources {
                    if let Some(entry) = state
                        .snapshots
                        .get_mut(&(source.clone(), name.to_owned()))
                        .and_then(|generations| generations.get_mut(generation))
                    {
                        entry.links.extend(targets.iter().cloned());
                    }
                }
                Ok(())
            }
            "Unlink" => {
                for source in &sources {
                    let entry = state
                        .snapshots
                        .get_mut(&(source.clone(), name.to_owned()))
                        .and_then(|generations| generations.get_mut(generation));
                    if let Some(linked) = entry {
                        for target in &targets {
                            if !linked.links.remove(target) {
                                return Err(Failure::Job(format!(
                                    "Device {target} is not linked to snapshot {name}"
                                )));
                            }
                        }
                    }
                }
                Ok(())
            }
            "Rename" => {
                let new_name = text(body, "/newsnapshotname")
                    .ok_or_else(|| bad("newsnapshotname is required"))?;
                for source in &sources {
                    if state
                        .snapshots
                        .contains_key(&(source.clone(), new_name.clone()))
                    {
                        return Err(conflict("Snapshot", &new_name));
                    }
                }
                for source in sources {
                    if let Some(generations) =
                        state.snapshots.remove(&(source.clone(), name.to_owned()))
                    {
                        state
                            .snapshots
                            .insert((source, new_name.clone()), generations);
                    }
                }
                Ok(())
            }
            "Restore" => Ok(()),
            other => Err(bad(format!("unsupported snapshot action {other}"))),
        }
    }

    fn delete_snapshot(
        &mut self,
        array: &str,
        name: &str,
        generation: usize,
        body: &Value,
    ) -> Outcome<()> {
        let sources = names(body.get("deviceNameListSource"));
        let state = self.state(array);
        for source in &sources {
            let entry = state
                .snapshots
                .get(&(source.clone(), name.to_owned()))
                .and_then(|generations| generations.get(generation))
                .ok_or_else(|| missing("Snapshot generation", &generation.to_string()))?;
            if !entry.links.is_empty() {
                return Err(Failure::Job(format!(
                    "Snapshot {name} generation {generation} has linked targets"
                )));
            }
        }
        for source in sources {
            let key = (source, name.to_owned());
            let emptied = state.snapshots.get_mut(&key).is_some_and(|generations| {
                generations.remove(generation);
                generations.is_empty()
            });
            if emptied {
                state.snapshots.remove(&key);
            }
        }
        Ok(())
    }

    fn protect_group(&mut self, array: &str, group: &str, body: &Value) -> Outcome<()> {
        let remote_array = text(body, "/remoteSymmId").ok_or_else(|| bad("remoteSymmId is required"))?;
        let remote_group = text(body, "/remoteStorageGroupName")
            .ok_or_else(|| bad("remoteStorageGroupName is required"))?;
        let rdf_group = number(body, "/rdfgNumber")
            .and_then(|raw| u32::try_from(raw).ok())
            .ok_or_else(|| bad("rdfgNumber is required"))?;
        let mode = text(body, "/replicationMode").unwrap_or_else(|| String::from("Synchronous"));

        let state = self.state(array);
        let target = state.groups.get(group).ok_or_else(|| missing("Storage Group", group))?;
        if target.protection.is_some() {
            return Err(bad(format!("Storage group {group} is already protected")));
        }
        let link = state
            .rdf_groups
            .get(&rdf_group)
            .cloned()
            .ok_or_else(|| bad(format!("RDF group {rdf_group} does not exist")))?;
        if link.remote_array != remote_array {
            return Err(bad(format!(
                "RDF group {rdf_group} does not connect to array {remote_array}"
            )));
        }
        if !self.arrays.contains_key(&remote_array) {
            return Err(bad(format!("Array {remote_array} is not reachable")));
        }
        let members = self
            .state(array)
            .groups
            .get(group)
            .map(|target| target.volumes.clone())
            .unwrap_or_default();

        let protection = Protection {
            rdf_group,
            remote_array: remote_array.clone(),
            remote_group: remote_group.clone(),
            mode: mode.clone(),
            state: String::from("Synchronized"),
        };
        self.state(&remote_array)
            .groups
            .entry(remote_group.clone())
            .or_default()
            .protection = Some(Protection {
            rdf_group: link.remote_number,
            remote_array: array.to_owned(),
            remote_group: group.to_owned(),
            mode,
            state: String::from("Synchronized"),
        });
        if let Some(target) = self.state(array).groups.get_mut(group) {
            target.protection = Some(protection.clone());
        }
        for id in members {
            self.pair_with_new_partner(array, &id, &protection, &remote_group);
        }
        Ok(())
    }

    fn replication_action(
        &mut self,
        array: &str,
        group: &str,
        number: &str,
        body: &Value,
    ) -> Outcome<()> {
        let action = text(body, "/action").unwrap_or_default();
        let protection = self
            .state(array)
            .groups
            .get(group)
            .and_then(|target| target.protection.clone())
            .filter(|protection| protection.rdf_group.to_string() == number)
            .ok_or_else(|| missing("Storage group replication", group))?;
        let next = match action.as_str() {
            "Suspend" => {
                if protection.state == "Suspended" {
                    return Err(Failure::Job(String::from(
                        "The RDF group is already suspended",
                    )));
                }
                "Suspended"
            }
            "Establish" | "Resume" | "Failback" => {
                if protection.state == "Synchronized" {
                    return Err(Failure::Job(format!(
                        "Devices in storage group {group} are already in the requested state"
                    )));
                }
                "Synchronized"
            }
            "Split" => "Split",
            "Failover" => "Failed Over",
            other => return Err(bad(format!("unsupported replication action {other}"))),
        };
        if let Some(target) = self.state(array).groups.get_mut(group)
            && let Some(local) = target.protection.as_mut()
        {
            next.clone_into(&mut local.state);
        }
        if let Some(target) = self
            .state(&protection.remote_array)
            .groups
            .get_mut(&protection.remote_group)
            && let Some(remote) = target.protection.as_mut()
        {
            next.clone_into(&mut remote.state);
        }
        Ok(())
    }
}

fn parse_generation(raw: &str) -> Outcome<usize> {
    raw.parse()
        .map_err(|_| bad(format!("generation {raw} is not a number")))
}
