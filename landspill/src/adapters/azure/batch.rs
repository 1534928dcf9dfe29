// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::auth::SharedKey;
use super::error::{AzureError, map_azure_error};
use super::{Payload, SignedClient, join_segments, parse_endpoint};
use crate::app::errors::AppResult;
use crate::app::ports::BatchServicePort;
use crate::app::types::{
    AllocationState, Credential, JobInfo, NodeTarget, PoolInfo, PoolSpec, PoolState, RemoteTask,
    RemoteTaskState, TaskSpec,
};

pub const BATCH_API_VERSION: &str = "2023-05-01.17.0";
const JSON_CONTENT_TYPE: &str = "application/json; odata=minimalmetadata";

const IMAGE_PUBLISHER: &str = "microsoft-azure-batch";
const IMAGE_OFFER: &str = "ubuntu-server-container";
const IMAGE_SKU: &str = "20-04-lts";
const NODE_AGENT_SKU: &str = "batch.node.ubuntu 20.04";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolBody<'a> {
    id: &'a str,
    vm_size: &'a str,
    virtual_machine_configuration: VirtualMachineConfiguration<'a>,
    target_dedicated_nodes: u32,
    target_low_priority_nodes: u32,
    enable_auto_scale: bool,
    task_slots_per_node: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VirtualMachineConfiguration<'a> {
    image_reference: ImageReference,
    #[serde(rename = "nodeAgentSKUId")]
    node_agent_sku_id: &'static str,
    container_configuration: ContainerConfiguration<'a>,
}

#[derive(Debug, Serialize)]
struct ImageReference {
    publisher: &'static str,
    offer: &'static str,
    sku: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerConfiguration<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    container_image_names: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResizeBody {
    target_dedicated_nodes: u32,
    target_low_priority_nodes: u32,
    node_deallocation_option: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobBody<'a> {
    id: &'a str,
    pool_info: PoolRef<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolRef<'a> {
    pool_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskBody<'a> {
    id: &'a str,
    command_line: &'a str,
    container_settings: ContainerSettings<'a>,
    resource_files: Vec<ResourceFile<'a>>,
    output_files: Vec<OutputFile<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerSettings<'a> {
    image_name: &'a str,
    container_run_options: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceFile<'a> {
    storage_container_url: &'a str,
    blob_prefix: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputFile<'a> {
    file_pattern: &'a str,
    destination: OutputDestination<'a>,
    upload_options: UploadOptions,
}

#[derive(Debug, Serialize)]
struct OutputDestination<'a> {
    container: OutputContainer<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputContainer<'a> {
    container_url: &'a str,
    path: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadOptions {
    upload_condition: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolResource {
    id: String,
    state: Option<String>,
    allocation_state: Option<String>,
    #[serde(default)]
    target_dedicated_nodes: u32,
    #[serde(default)]
    target_low_priority_nodes: u32,
    #[serde(default)]
    vm_size: String,
}

#[derive(Debug, Deserialize)]
struct StateResource {
    id: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct TaskPage {
    #[serde(default)]
    value: Vec<StateResource>,
    #[serde(rename = "odata.nextLink")]
    next_link: Option<String>,
}

fn pool_info(resource: PoolResource) -> PoolInfo {
    let state = match resource.state.as_deref() {
        Some("active") => PoolState::Active,
        Some("deleting") => PoolState::Deleting,
        _ => PoolState::Unknown,
    };
    let allocation_state = match resource.allocation_state.as_deref() {
        Some("steady") => AllocationState::Steady,
        Some("resizing") => AllocationState::Resizing,
        Some("stopping") => AllocationState::Stopping,
        _ => AllocationState::Unknown,
    };
    PoolInfo {
        id: resource.id,
        state,
        allocation_state,
        target: NodeTarget {
            dedicated: resource.target_dedicated_nodes,
            low_priority: resource.target_low_priority_nodes,
        },
        vm_size: resource.vm_size,
    }
}

fn remote_task(resource: StateResource) -> RemoteTask {
    let state = match resource.state.as_str() {
        "preparing" => RemoteTaskState::Preparing,
        "running" => RemoteTaskState::Running,
        "completed" => RemoteTaskState::Completed,
        "failed" => RemoteTaskState::Failed,
        _ => RemoteTaskState::Active,
    };
    RemoteTask {
        id: resource.id,
        state,
    }
}

fn pool_body(spec: &PoolSpec) -> PoolBody<'_> {
    PoolBody {
        id: &spec.id,
        vm_size: spec.vm_size.as_str(),
        virtual_machine_configuration: VirtualMachineConfiguration {
            image_reference: ImageReference {
                publisher: IMAGE_PUBLISHER,
                offer: IMAGE_OFFER,
                sku: IMAGE_SKU,
                version: "latest",
            },
            node_agent_sku_id: NODE_AGENT_SKU,
            container_configuration: ContainerConfiguration {
                kind: "dockerCompatible",
                container_image_names: &spec.container_images,
            },
        },
        target_dedicated_nodes: spec.target.dedicated,
        target_low_priority_nodes: spec.target.low_priority,
        enable_auto_scale: false,
        task_slots_per_node: 1,
    }
}

fn task_body(task: &TaskSpec) -> TaskBody<'_> {
    TaskBody {
        id: &task.id,
        command_line: &task.command_line,
        container_settings: ContainerSettings {
            image_name: &task.image_name,
            container_run_options: &task.container_run_options,
        },
        resource_files: vec![ResourceFile {
            storage_container_url: &task.input_container_url,
            blob_prefix: &task.input_blob_prefix,
        }],
        output_files: task
            .output_files
            .iter()
            .map(|output| OutputFile {
                file_pattern: &output.file_pattern,
                destination: OutputDestination {
                    container: OutputContainer {
                        container_url: &output.container_url,
                        path: &output.path,
                    },
                },
                upload_options: UploadOptions {
                    upload_condition: "taskcompletion",
                },
            })
            .collect(),
    }
}

/// Batch service client. Every call is a single REST request except
/// `list_tasks`, which follows `odata.nextLink` pages.
pub struct AzureBatchClient {
    client: SignedClient,
    endpoint: Url,
}

impl AzureBatchClient {
    pub fn new(credential: &Credential) -> AppResult<Self> {
        credential.ensure_complete()?;
        Self::build(credential).map_err(map_azure_error)
    }

    fn build(credential: &Credential) -> Result<Self, AzureError> {
        let key = SharedKey::new(
            &credential.batch_account_name,
            &credential.batch_account_key,
        )?;
        Ok(Self {
            client: SignedClient::new(key, "ocp-date", Vec::new())?,
            endpoint: parse_endpoint(&credential.batch_account_url)?,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, AzureError> {
        let mut url = join_segments(&self.endpoint, segments.iter().copied())?;
        url.query_pairs_mut()
            .append_pair("api-version", BATCH_API_VERSION);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, AzureError> {
        let response = self.client.send(Method::GET, url, &[], None).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| AzureError::Decode(err.to_string()))
    }

    /// GET that maps a 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, AzureError> {
        match self.get_json(url).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn post_json<T: Serialize>(&self, url: Url, body: &T) -> Result<(), AzureError> {
        let bytes = serde_json::to_vec(body).map_err(|err| AzureError::Decode(err.to_string()))?;
        self.client
            .send(
                Method::POST,
                url,
                &[],
                Some(Payload {
                    bytes,
                    content_type: JSON_CONTENT_TYPE,
                }),
            )
            .await?;
        Ok(())
    }

    /// DELETE that reports whether there was anything to delete.
    async fn delete(&self, url: Url) -> Result<bool, AzureError> {
        match self.client.send(Method::DELETE, url, &[], None).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl BatchServicePort for AzureBatchClient {
    #[tracing::instrument(skip(self), fields(account = self.client.key().account()))]
    async fn get_pool(&self, pool_id: &str) -> AppResult<Option<PoolInfo>> {
        let url = self.url(&["pools", pool_id]).map_err(map_azure_error)?;
        let pool = self
            .get_optional::<PoolResource>(url)
            .await
            .map_err(map_azure_error)?;
        Ok(pool.map(pool_info))
    }

    #[tracing::instrument(skip(self, spec), fields(pool = %spec.id, vm_size = spec.vm_size.as_str()))]
    async fn create_pool(&self, spec: &PoolSpec) -> AppResult<()> {
        let url = self.url(&["pools"]).map_err(map_azure_error)?;
        self.post_json(url, &pool_body(spec))
            .await
            .map_err(map_azure_error)
    }

    #[tracing::instrument(skip(self), fields(dedicated = target.dedicated, low_priority = target.low_priority))]
    async fn resize_pool(&self, pool_id: &str, target: NodeTarget) -> AppResult<()> {
        let url = self
            .url(&["pools", pool_id, "resize"])
            .map_err(map_azure_error)?;
        let body = ResizeBody {
            target_dedicated_nodes: target.dedicated,
            target_low_priority_nodes: target.low_priority,
            node_deallocation_option: "requeue",
        };
        self.post_json(url, &body).await.map_err(map_azure_error)
    }

    #[tracing::instrument(skip(self))]
    async fn stop_resize(&self, pool_id: &str) -> AppResult<()> {
        let url = self
            .url(&["pools", pool_id, "stopresize"])
            .map_err(map_azure_error)?;
        self.client
            .send(
                Method::POST,
                url,
                &[],
                Some(Payload {
                    bytes: Vec::new(),
                    content_type: JSON_CONTENT_TYPE,
                }),
            )
            .await
            .map_err(map_azure_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_pool(&self, pool_id: &str) -> AppResult<bool> {
        let url = self.url(&["pools", pool_id]).map_err(map_azure_error)?;
        self.delete(url).await.map_err(map_azure_error)
    }

    #[tracing::instrument(skip(self))]
    async fn get_job(&self, job_id: &str) -> AppResult<Option<JobInfo>> {
        let url = self.url(&["jobs", job_id]).map_err(map_azure_error)?;
        let job = self
            .get_optional::<StateResource>(url)
            .await
            .map_err(map_azure_error)?;
        Ok(job.map(|job| JobInfo {
            id: job.id,
            state: job.state,
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn create_job(&self, job_id: &str, pool_id: &str) -> AppResult<()> {
        let url = self.url(&["jobs"]).map_err(map_azure_error)?;
        let body = JobBody {
            id: job_id,
            pool_info: PoolRef { pool_id },
        };
        self.post_json(url, &body).await.map_err(map_azure_error)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_job(&self, job_id: &str) -> AppResult<bool> {
        let url = self.url(&["jobs", job_id]).map_err(map_azure_error)?;
        self.delete(url).await.map_err(map_azure_error)
    }

    #[tracing::instrument(skip(self))]
    async fn get_task(&self, job_id: &str, task_id: &str) -> AppResult<Option<RemoteTask>> {
        let url = self
            .url(&["jobs", job_id, "tasks", task_id])
            .map_err(map_azure_error)?;
        match self.get_json::<StateResource>(url).await {
            Ok(task) => Ok(Some(remote_task(task))),
            // A missing job is a real error; only a missing task means "absent".
            Err(err) if err.service_code() == Some("TaskNotFound") => Ok(None),
            Err(err) => Err(map_azure_error(err)),
        }
    }

    #[tracing::instrument(skip(self, task), fields(task = %task.id))]
    async fn add_task(&self, job_id: &str, task: &TaskSpec) -> AppResult<()> {
        let url = self
            .url(&["jobs", job_id, "tasks"])
            .map_err(map_azure_error)?;
        self.post_json(url, &task_body(task))
            .await
            .map_err(map_azure_error)
    }

    #[tracing::instrument(skip(self))]
    async fn list_tasks(&self, job_id: &str) -> AppResult<Vec<RemoteTask>> {
        let mut url = self
            .url(&["jobs", job_id, "tasks"])
            .map_err(map_azure_error)?;
        url.query_pairs_mut().append_pair("$select", "id,state");

        let mut tasks = Vec::new();
        loop {
            let page = self
                .get_json::<TaskPage>(url)
                .await
                .map_err(map_azure_error)?;
            tasks.extend(page.value.into_iter().map(remote_task));
            match page.next_link {
                Some(next) => {
                    url = parse_endpoint(&next).map_err(map_azure_error)?;
                }
                None => break,
            }
        }
        tracing::debug!(count = tasks.len(), "listed tasks");
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::{OutputFileSpec, VmSize};
    use serde_json::json;

    fn credential() -> Credential {
        Credential {
            batch_account_name: "acct".to_string(),
            batch_account_key: "a2V5".to_string(),
            batch_account_url: "https://acct.eastus.batch.azure.com".to_string(),
            storage_account_name: "store".to_string(),
            storage_account_key: "a2V5".to_string(),
        }
    }

    #[test]
    fn pool_body_uses_container_image() {
        let spec = PoolSpec {
            id: "gulf-pool".to_string(),
            vm_size: VmSize::StandardH8,
            target: NodeTarget::default(),
            container_images: vec!["barbagroup/landspill:bionic".to_string()],
        };
        let value = serde_json::to_value(pool_body(&spec)).unwrap();
        assert_eq!(value["vmSize"], "STANDARD_H8");
        assert_eq!(value["targetDedicatedNodes"], 0);
        assert_eq!(
            value["virtualMachineConfiguration"]["nodeAgentSKUId"],
            NODE_AGENT_SKU
        );
        assert_eq!(
            value["virtualMachineConfiguration"]["containerConfiguration"],
            json!({"type": "dockerCompatible", "containerImageNames": ["barbagroup/landspill:bionic"]})
        );
    }

    #[test]
    fn task_body_wires_inputs_and_outputs() {
        let task = TaskSpec {
            id: "c1".to_string(),
            command_line: "/bin/bash -c 'run'".to_string(),
            image_name: "img".to_string(),
            container_run_options: "--rm".to_string(),
            input_container_url: "https://s/c?sig".to_string(),
            input_blob_prefix: "c1".to_string(),
            output_files: vec![OutputFileSpec {
                file_pattern: "c1/**/*".to_string(),
                container_url: "https://s/c?sig".to_string(),
                path: "c1".to_string(),
            }],
        };
        let value = serde_json::to_value(task_body(&task)).unwrap();
        assert_eq!(value["resourceFiles"][0]["blobPrefix"], "c1");
        assert_eq!(
            value["outputFiles"][0],
            json!({
                "filePattern": "c1/**/*",
                "destination": {"container": {"containerUrl": "https://s/c?sig", "path": "c1"}},
                "uploadOptions": {"uploadCondition": "taskcompletion"}
            })
        );
    }

    #[test]
    fn parses_pool_resource() {
        let pool: PoolResource = serde_json::from_value(json!({
            "id": "gulf-pool",
            "state": "active",
            "allocationState": "resizing",
            "targetDedicatedNodes": 2,
            "vmSize": "standard_h8"
        }))
        .unwrap();
        let info = pool_info(pool);
        assert_eq!(info.allocation_state, AllocationState::Resizing);
        assert_eq!(info.target.dedicated, 2);
        assert_eq!(info.target.low_priority, 0);
    }

    #[test]
    fn parses_task_pages() {
        let page: TaskPage = serde_json::from_value(json!({
            "value": [{"id": "c1", "state": "completed"}, {"id": "c2", "state": "running"}],
            "odata.nextLink": "https://acct.eastus.batch.azure.com/jobs/j/tasks?page=2"
        }))
        .unwrap();
        let tasks: Vec<_> = page.value.into_iter().map(remote_task).collect();
        assert_eq!(tasks[0].state, RemoteTaskState::Completed);
        assert_eq!(tasks[1].state, RemoteTaskState::Running);
        assert!(page.next_link.is_some());
    }

    #[test]
    fn urls_carry_api_version() {
        let client = AzureBatchClient::new(&credential()).unwrap();
        let url = client.url(&["jobs", "gulf-job", "tasks", "c1"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.eastus.batch.azure.com/jobs/gulf-job/tasks/c1?api-version=2023-05-01.17.0"
        );
    }

    #[test]
    fn incomplete_credential_is_rejected() {
        let mut cred = credential();
        cred.batch_account_url.clear();
        assert!(AzureBatchClient::new(&cred).is_err());
    }
}
