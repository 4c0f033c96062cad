//! HTTP control-plane client
//!
//! One request per call: no retry happens here. Callers that need retry
//! (bootstrap, the command recorder) own that policy.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::auth::{http_date, HttpSigner};
use super::{ControlPlane, ServiceError, TerminalRegistration};
use crate::model::{AccessKey, Command, FtpLog};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ACCEPT_JSON: &str = "application/json";
const ORG_HEADER: &str = "X-JMS-ORG";
const ROOT_ORG: &str = "ROOT";
const TERMINAL_TYPE: &str = "koko";

const TERMINAL_REGISTRATION_URL: &str = "/api/v1/terminal/terminal-registrations/";
const USER_PROFILE_URL: &str = "/api/v1/users/profile/";
const SESSION_REPLAY_URL: &str = "/api/v1/terminal/sessions/{}/replay/";
const FTP_LOG_FILE_URL: &str = "/api/v1/audits/ftp-logs/{}/upload/";
const SESSION_COMMAND_URL: &str = "/api/v1/terminal/commands/";
const FTP_LOG_URL: &str = "/api/v1/audits/ftp-logs/";

fn with_id(template: &str, id: &str) -> String {
    template.replacen("{}", id, 1)
}

fn base_url(core_host: &str) -> String {
    core_host.trim_end_matches('/').to_string()
}

fn http_client(timeout: Duration) -> Result<Client, ServiceError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Map a non-2xx response to an error, keeping 401 distinct
async fn check(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ServiceError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Deserialize)]
struct RegistrationResponse {
    service_account: ServiceAccount,
}

#[derive(Deserialize)]
struct ServiceAccount {
    access_key: KeyPair,
}

#[derive(Deserialize)]
struct KeyPair {
    id: String,
    secret: String,
}

/// Unauthenticated client for registration and key validation
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    base_url: String,
    http: Client,
}

impl RegistrationClient {
    pub fn new(core_host: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            base_url: base_url(core_host),
            http: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl TerminalRegistration for RegistrationClient {
    async fn register_terminal_account(
        &self,
        name: &str,
        bootstrap_token: &str,
    ) -> Result<AccessKey, ServiceError> {
        let url = format!("{}{}", self.base_url, TERMINAL_REGISTRATION_URL);
        let response = self
            .http
            .post(&url)
            .header("Accept", ACCEPT_JSON)
            .header("Authorization", format!("BootstrapToken {}", bootstrap_token))
            .header(ORG_HEADER, ROOT_ORG)
            .json(&json!({
                "name": name,
                "comment": name,
                "type": TERMINAL_TYPE,
            }))
            .send()
            .await?;

        let body = check(response).await?.text().await?;
        let registration: RegistrationResponse = serde_json::from_str(&body)
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        let key = registration.service_account.access_key;
        info!("Registered terminal {} with key {}", name, key.id);
        Ok(AccessKey::new(key.id, key.secret))
    }

    async fn valid_access_key(&self, key: &AccessKey) -> Result<(), ServiceError> {
        let signer = HttpSigner::new(key.clone());
        let request = signed(&self.http, &self.base_url, &signer, Method::GET, USER_PROFILE_URL)?;
        check(request.send().await?).await?;
        debug!("Access key {} is valid", key.id);
        Ok(())
    }
}

fn signed(
    http: &Client,
    base_url: &str,
    signer: &HttpSigner,
    method: Method,
    path: &str,
) -> Result<RequestBuilder, ServiceError> {
    let date = http_date(chrono::Utc::now());
    let authorization = signer.authorization(method.as_str(), path, ACCEPT_JSON, &date)?;
    Ok(http
        .request(method, format!("{}{}", base_url, path))
        .header("Accept", ACCEPT_JSON)
        .header("Date", date)
        .header("Authorization", authorization)
        .header(ORG_HEADER, ROOT_ORG))
}

/// Authenticated control-plane client
#[derive(Debug, Clone)]
pub struct JmsService {
    base_url: String,
    http: Client,
    signer: HttpSigner,
}

/// Builder for [`JmsService`]
#[derive(Debug, Default)]
pub struct JmsServiceBuilder {
    core_host: Option<String>,
    timeout: Option<Duration>,
    access_key: Option<AccessKey>,
}

impl JmsServiceBuilder {
    pub fn core_host(mut self, core_host: impl Into<String>) -> Self {
        self.core_host = Some(core_host.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn access_key(mut self, key: AccessKey) -> Self {
        self.access_key = Some(key);
        self
    }

    pub fn build(self) -> Result<JmsService, ServiceError> {
        let core_host = self
            .core_host
            .ok_or(ServiceError::MissingOption("core_host"))?;
        let key = self
            .access_key
            .ok_or(ServiceError::MissingOption("access_key"))?;

        Ok(JmsService {
            base_url: base_url(&core_host),
            http: http_client(self.timeout.unwrap_or(DEFAULT_TIMEOUT))?,
            signer: HttpSigner::new(key),
        })
    }
}

impl JmsService {
    pub fn builder() -> JmsServiceBuilder {
        JmsServiceBuilder::default()
    }

    pub fn key_id(&self) -> &str {
        self.signer.key_id()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ServiceError> {
        signed(&self.http, &self.base_url, &self.signer, method, path)
    }

    async fn upload_file(&self, path: &str, archive: &Path) -> Result<(), ServiceError> {
        let data = tokio::fs::read(archive).await?;
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = data.len();
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name));

        check(self.request(Method::POST, path)?.multipart(form).send().await?).await?;
        info!("Uploaded {:?} ({} bytes) to {}", archive, size, path);
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for JmsService {
    async fn upload_replay(&self, id: &str, archive: &Path) -> Result<(), ServiceError> {
        self.upload_file(&with_id(SESSION_REPLAY_URL, id), archive).await
    }

    async fn push_ftp_log_file(&self, id: &str, archive: &Path) -> Result<(), ServiceError> {
        self.upload_file(&with_id(FTP_LOG_FILE_URL, id), archive).await
    }

    async fn push_session_command(&self, commands: &[Command]) -> Result<(), ServiceError> {
        let request = self.request(Method::POST, SESSION_COMMAND_URL)?.json(commands);
        check(request.send().await?).await?;
        debug!("Pushed {} commands", commands.len());
        Ok(())
    }

    async fn create_ftp_log(&self, log: &FtpLog) -> Result<(), ServiceError> {
        let request = self.request(Method::POST, FTP_LOG_URL)?.json(log);
        check(request.send().await?).await?;
        Ok(())
    }
}
