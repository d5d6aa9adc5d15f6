use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};

use super::models::{
    Disk, ListResponse, NetworkInterface, NetworkSecurityGroup, PublicIpAddress, ResourceGroup,
    StorageAccount, StorageAccountCreate, StorageAccountKeys, VirtualMachine, VirtualNetwork,
};
use super::{
    resource_id, ResourceManager, DISKS, NETWORK_INTERFACES, NETWORK_SECURITY_GROUPS,
    PUBLIC_IP_ADDRESSES, STORAGE_ACCOUNTS, VIRTUAL_MACHINES, VIRTUAL_NETWORKS,
};
use crate::http::{send_with_retry, HttpError};
use crate::retry::RetryConfig;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

const RESOURCES_API_VERSION: &str = "2021-04-01";
const STORAGE_API_VERSION: &str = "2023-01-01";
const DISKS_API_VERSION: &str = "2023-04-02";
const COMPUTE_API_VERSION: &str = "2023-09-01";
const NETWORK_API_VERSION: &str = "2023-09-01";

/// How long-running operations are awaited
#[derive(Clone, Debug)]
struct PollConfig {
    interval: Duration,
    timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Azure Resource Manager API client
pub struct ArmClient {
    client: Client,
    endpoint: String,
    subscription_id: String,
    token: String,
    retry: RetryConfig,
    poll: PollConfig,
}

impl ArmClient {
    pub fn new(subscription_id: String, token: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("vhd2vm/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            subscription_id,
            token,
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
        })
    }

    /// Override the management endpoint (sovereign clouds, test servers)
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn subscription_url(&self, path: &str) -> String {
        format!(
            "{}/subscriptions/{}{}",
            self.endpoint, self.subscription_id, path
        )
    }

    fn resource_url(&self, resource_group: &str, provider_type: &str, name: &str) -> String {
        format!(
            "{}{}",
            self.endpoint,
            resource_id(&self.subscription_id, resource_group, provider_type, name)
        )
    }

    /// Sends with retries. `None` leaves the URL's own query untouched (list nextLinks).
    async fn request(
        &self,
        method: Method,
        url: &str,
        api_version: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, HttpError> {
        send_with_retry(&self.retry, || {
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(&self.token);
            if let Some(version) = api_version {
                request = request.query(&[("api-version", version)]);
            }
            request = match body {
                Some(json) => request.json(json),
                None => request,
            };
            Ok(request)
        })
        .await
    }

    /// GET request to the management API
    pub async fn get<T: DeserializeOwned>(&self, url: &str, api_version: &str) -> Result<T> {
        let value = self
            .request(Method::GET, url, Some(api_version), None)
            .await
            .with_context(|| format!("GET {}", url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse response of GET {}", url))?;
        Ok(value)
    }

    /// GET every page of a list operation
    pub async fn list<T: DeserializeOwned>(&self, url: &str, api_version: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page: ListResponse<T> = self.get(url, api_version).await?;
        loop {
            items.append(&mut page.value);
            match page.next_link.take() {
                // nextLink already carries api-version and the skip token
                Some(next) => {
                    page = self
                        .request(Method::GET, &next, None, None)
                        .await
                        .with_context(|| format!("GET {}", next))?
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse response of GET {}", next))?;
                }
                None => break,
            }
        }
        Ok(items)
    }

    /// POST with an empty body (action endpoints such as listKeys)
    pub async fn post_action<T: DeserializeOwned>(&self, url: &str, api_version: &str) -> Result<T> {
        let empty = serde_json::json!({});
        let value = self
            .request(Method::POST, url, Some(api_version), Some(&empty))
            .await
            .with_context(|| format!("POST {}", url))?
            .json()
            .await?;
        Ok(value)
    }

    /// Create-or-update PUT that waits for a terminal provisioning state
    pub async fn put_and_wait<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        api_version: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let response = self
            .request(Method::PUT, url, Some(api_version), Some(&body))
            .await
            .with_context(|| format!("PUT {}", url))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status != StatusCode::ACCEPTED && !text.trim().is_empty() {
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse response of PUT {}", url))?;
            match provisioning_state(&value) {
                ProvisioningState::Succeeded => return Ok(serde_json::from_value(value)?),
                ProvisioningState::Failed(state) => {
                    bail!("Provisioning of {} ended in state '{}'", url, state)
                }
                ProvisioningState::InProgress => {}
            }
        }

        self.wait_for_provisioning(url, api_version).await
    }

    async fn wait_for_provisioning<T: DeserializeOwned>(
        &self,
        url: &str,
        api_version: &str,
    ) -> Result<T> {
        let started = Instant::now();
        loop {
            tokio::time::sleep(self.poll.interval).await;

            match self.request(Method::GET, url, Some(api_version), None).await {
                Ok(response) => {
                    let value: serde_json::Value = response.json().await?;
                    match provisioning_state(&value) {
                        ProvisioningState::Succeeded => return Ok(serde_json::from_value(value)?),
                        ProvisioningState::Failed(state) => {
                            bail!("Provisioning of {} ended in state '{}'", url, state)
                        }
                        ProvisioningState::InProgress => {
                            tracing::debug!(url, "resource still provisioning");
                        }
                    }
                }
                // The resource may not be readable until the accepted PUT has progressed
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(anyhow::Error::new(e).context(format!("GET {}", url))),
            }

            if started.elapsed() > self.poll.timeout {
                bail!(
                    "Timed out after {:?} waiting for {} to provision",
                    self.poll.timeout,
                    url
                );
            }
        }
    }
}

enum ProvisioningState {
    Succeeded,
    Failed(String),
    InProgress,
}

/// Resources without a provisioning state (resource groups, some responses) count as done.
fn provisioning_state(value: &serde_json::Value) -> ProvisioningState {
    let state = value
        .get("properties")
        .and_then(|p| p.get("provisioningState"))
        .and_then(|s| s.as_str());
    match state {
        None => ProvisioningState::Succeeded,
        Some(s) if s.eq_ignore_ascii_case("succeeded") => ProvisioningState::Succeeded,
        Some(s) if s.eq_ignore_ascii_case("failed") || s.eq_ignore_ascii_case("canceled") => {
            ProvisioningState::Failed(s.to_string())
        }
        Some(_) => ProvisioningState::InProgress,
    }
}

/// API version to use for a resource ID, keyed on its provider and type.
pub fn api_version_for(id: &str) -> Option<&'static str> {
    let id = id.to_ascii_lowercase();
    if id.contains("/providers/microsoft.storage/") {
        Some(STORAGE_API_VERSION)
    } else if id.contains("/providers/microsoft.compute/disks/") {
        Some(DISKS_API_VERSION)
    } else if id.contains("/providers/microsoft.compute/") {
        Some(COMPUTE_API_VERSION)
    } else if id.contains("/providers/microsoft.network/") {
        Some(NETWORK_API_VERSION)
    } else if id.contains("/resourcegroups/") && !id.contains("/providers/") {
        Some(RESOURCES_API_VERSION)
    } else {
        None
    }
}

#[async_trait]
impl ResourceManager for ArmClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>> {
        self.list(&self.subscription_url("/resourcegroups"), RESOURCES_API_VERSION)
            .await
            .context("Failed to list resource groups")
    }

    async fn create_resource_group(
        &self,
        name: &str,
        group: &ResourceGroup,
    ) -> Result<ResourceGroup> {
        let url = self.subscription_url(&format!("/resourcegroups/{}", name));
        self.put_and_wait(&url, RESOURCES_API_VERSION, group)
            .await
            .with_context(|| format!("Failed to create resource group '{}'", name))
    }

    async fn create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        params: &StorageAccountCreate,
    ) -> Result<StorageAccount> {
        let url = self.resource_url(resource_group, STORAGE_ACCOUNTS, name);
        self.put_and_wait(&url, STORAGE_API_VERSION, params)
            .await
            .with_context(|| format!("Failed to create storage account '{}'", name))
    }

    async fn get_storage_account(&self, resource_group: &str, name: &str) -> Result<StorageAccount> {
        let url = self.resource_url(resource_group, STORAGE_ACCOUNTS, name);
        self.get(&url, STORAGE_API_VERSION)
            .await
            .with_context(|| format!("Failed to get storage account '{}'", name))
    }

    async fn list_storage_accounts(&self) -> Result<Vec<StorageAccount>> {
        self.list(
            &self.subscription_url("/providers/Microsoft.Storage/storageAccounts"),
            STORAGE_API_VERSION,
        )
        .await
        .context("Failed to list storage accounts")
    }

    async fn list_storage_account_keys(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccountKeys> {
        let url = format!(
            "{}/listKeys",
            self.resource_url(resource_group, STORAGE_ACCOUNTS, name)
        );
        self.post_action(&url, STORAGE_API_VERSION)
            .await
            .with_context(|| format!("Failed to list keys of storage account '{}'", name))
    }

    async fn create_disk(&self, resource_group: &str, name: &str, disk: &Disk) -> Result<Disk> {
        let url = self.resource_url(resource_group, DISKS, name);
        self.put_and_wait(&url, DISKS_API_VERSION, disk)
            .await
            .with_context(|| format!("Failed to create managed disk '{}'", name))
    }

    async fn create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        vnet: &VirtualNetwork,
    ) -> Result<VirtualNetwork> {
        let url = self.resource_url(resource_group, VIRTUAL_NETWORKS, name);
        self.put_and_wait(&url, NETWORK_API_VERSION, vnet)
            .await
            .with_context(|| format!("Failed to create virtual network '{}'", name))
    }

    async fn create_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
        nsg: &NetworkSecurityGroup,
    ) -> Result<NetworkSecurityGroup> {
        let url = self.resource_url(resource_group, NETWORK_SECURITY_GROUPS, name);
        self.put_and_wait(&url, NETWORK_API_VERSION, nsg)
            .await
            .with_context(|| format!("Failed to create network security group '{}'", name))
    }

    async fn create_public_ip_address(
        &self,
        resource_group: &str,
        name: &str,
        pip: &PublicIpAddress,
    ) -> Result<PublicIpAddress> {
        let url = self.resource_url(resource_group, PUBLIC_IP_ADDRESSES, name);
        self.put_and_wait(&url, NETWORK_API_VERSION, pip)
            .await
            .with_context(|| format!("Failed to create public IP address '{}'", name))
    }

    async fn create_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface> {
        let url = self.resource_url(resource_group, NETWORK_INTERFACES, name);
        self.put_and_wait(&url, NETWORK_API_VERSION, nic)
            .await
            .with_context(|| format!("Failed to create network interface '{}'", name))
    }

    async fn create_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<serde_json::Value> {
        let url = self.resource_url(resource_group, VIRTUAL_MACHINES, name);
        self.put_and_wait(&url, COMPUTE_API_VERSION, vm)
            .await
            .with_context(|| format!("Failed to create virtual machine '{}'", name))
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        let api_version = api_version_for(id)
            .ok_or_else(|| anyhow::anyhow!("Don't know how to delete resource '{}'", id))?;
        let url = format!("{}{}", self.endpoint, id);

        match self.request(Method::DELETE, &url, Some(api_version), None).await {
            Ok(response) if response.status() == StatusCode::ACCEPTED => {}
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(anyhow::Error::new(e).context(format!("DELETE {}", id))),
        }

        // Accepted: wait until the resource is gone
        let started = Instant::now();
        loop {
            tokio::time::sleep(self.poll.interval).await;
            match self.request(Method::GET, &url, Some(api_version), None).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(anyhow::Error::new(e).context(format!("GET {}", id))),
                Ok(_) if started.elapsed() > self.poll.timeout => {
                    bail!("Timed out waiting for {} to be deleted", id)
                }
                Ok(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provisioning_state() {
        assert!(matches!(
            provisioning_state(&json!({ "properties": { "provisioningState": "Succeeded" } })),
            ProvisioningState::Succeeded
        ));
        assert!(matches!(
            provisioning_state(&json!({ "properties": { "provisioningState": "Creating" } })),
            ProvisioningState::InProgress
        ));
        assert!(matches!(
            provisioning_state(&json!({ "properties": { "provisioningState": "Failed" } })),
            ProvisioningState::Failed(_)
        ));
        assert!(matches!(
            provisioning_state(&json!({ "location": "westus" })),
            ProvisioningState::Succeeded
        ));
    }

    #[test]
    fn test_api_version_for() {
        assert_eq!(
            api_version_for("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sto1"),
            Some(STORAGE_API_VERSION)
        );
        assert_eq!(
            api_version_for("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/disks/os0-vm"),
            Some(DISKS_API_VERSION)
        );
        assert_eq!(
            api_version_for("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm"),
            Some(COMPUTE_API_VERSION)
        );
        assert_eq!(
            api_version_for("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/nic"),
            Some(NETWORK_API_VERSION)
        );
        assert_eq!(
            api_version_for("/subscriptions/s/resourceGroups/rg"),
            Some(RESOURCES_API_VERSION)
        );
        assert_eq!(api_version_for("/subscriptions/s/providers/Other/x"), None);
    }

    /// Answers one connection per canned response, in order, and returns the request
    /// lines it saw. `{endpoint}` in a body expands to the server's own address.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let base = endpoint.clone();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let text = String::from_utf8_lossy(&request);
                seen.push(text.lines().next().unwrap_or_default().to_string());

                let body = body.replace("{endpoint}", &base);
                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });
        (endpoint, handle)
    }

    fn test_client(endpoint: &str) -> ArmClient {
        let mut client = ArmClient::new("sub1".into(), "token".into())
            .unwrap()
            .with_endpoint(endpoint);
        client.retry = RetryConfig::fixed(3, Duration::from_millis(1));
        client
    }

    #[tokio::test]
    async fn test_list_retries_next_link_pages() {
        let (endpoint, server) = serve(vec![
            (
                200,
                r#"{"value":[{"name":"rg-a","location":"westus"}],"nextLink":"{endpoint}/page2?api-version=2021-04-01&skiptoken=abc"}"#,
            ),
            (503, "busy"),
            (200, r#"{"value":[{"name":"rg-b","location":"eastus"}]}"#),
        ])
        .await;

        let groups = test_client(&endpoint).list_resource_groups().await.unwrap();
        let names: Vec<_> = groups.iter().filter_map(|g| g.name.as_deref()).collect();
        assert_eq!(names, ["rg-a", "rg-b"]);

        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(
            seen[0],
            "GET /subscriptions/sub1/resourcegroups?api-version=2021-04-01 HTTP/1.1"
        );
        // The nextLink is sent as given, without a second api-version
        assert_eq!(seen[1], "GET /page2?api-version=2021-04-01&skiptoken=abc HTTP/1.1");
        assert_eq!(seen[2], seen[1]);
    }

    #[tokio::test]
    async fn test_list_next_link_failure_keeps_error_body() {
        let (endpoint, server) = serve(vec![
            (
                200,
                r#"{"value":[],"nextLink":"{endpoint}/page2?api-version=2021-04-01"}"#,
            ),
            (409, r#"{"error":{"code":"ConflictingPage"}}"#),
        ])
        .await;

        let err = test_client(&endpoint)
            .list_resource_groups()
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("ConflictingPage"));
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[test]
    fn test_resource_url() {
        let client = ArmClient::new("sub1".into(), "token".into())
            .unwrap()
            .with_endpoint("https://example.test/");
        assert_eq!(
            client.resource_url("rg1", DISKS, "os0"),
            "https://example.test/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Compute/disks/os0"
        );
    }
}
