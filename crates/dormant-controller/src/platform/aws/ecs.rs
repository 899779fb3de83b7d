// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ECS binding for [`Orchestrator`].

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{AwsPlatform, AwsRequest, AwsService};
use crate::platform::traits::{
    Attachment, AttachmentDetail, Orchestrator, PlatformError, Result, ServiceHandle,
};

const TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksRequest<'a> {
    cluster: &'a str,
    service_name: &'a str,
    desired_status: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksResponse {
    #[serde(default)]
    task_arns: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeTasksRequest<'a> {
    cluster: &'a str,
    tasks: [&'a str; 1],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeTasksResponse {
    #[serde(default)]
    tasks: Vec<TaskDescription>,
    #[serde(default)]
    failures: Vec<TaskFailure>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDescription {
    #[serde(default)]
    attachments: Vec<TaskAttachment>,
}

#[derive(Deserialize)]
struct TaskAttachment {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<KeyValuePair>,
}

#[derive(Deserialize)]
struct KeyValuePair {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct TaskFailure {
    #[serde(default)]
    arn: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateServiceRequest<'a> {
    cluster: &'a str,
    service: &'a str,
    desired_count: u32,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Task id from a task ARN (`arn:aws:ecs:region:acct:task/cluster/id` → `id`).
pub(super) fn task_id_from_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// `(code, message)` from a JSON error body. The code is the part of
/// `__type` after the last `#`.
pub(super) fn parse_error(body: &str) -> Option<(String, String)> {
    let error: ErrorBody = serde_json::from_str(body).ok()?;
    let kind = error.kind?;
    let code = kind.rsplit('#').next().unwrap_or(&kind).to_string();
    Some((code, error.message.unwrap_or_default()))
}

impl AwsPlatform {
    async fn ecs_call<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        request: &Req,
    ) -> Result<Resp> {
        let body = serde_json::to_vec(request)
            .map_err(|e| PlatformError::Other(format!("Failed to encode {}: {}", action, e)))?;
        let response = self
            .send(AwsRequest {
                service: AwsService::Ecs,
                method: Method::POST,
                path: "/",
                headers: vec![
                    ("content-type".to_string(), CONTENT_TYPE.to_string()),
                    (
                        "x-amz-target".to_string(),
                        format!("{}.{}", TARGET_PREFIX, action),
                    ),
                ],
                body,
            })
            .await?;
        serde_json::from_str(&response)
            .map_err(|e| PlatformError::Decode(format!("{} response: {}", action, e)))
    }
}

#[async_trait]
impl Orchestrator for AwsPlatform {
    fn platform_type(&self) -> &'static str {
        "ecs"
    }

    #[instrument(skip(self), fields(service = %service))]
    async fn list_running_instances(&self, service: &ServiceHandle) -> Result<Vec<String>> {
        let response: ListTasksResponse = self
            .ecs_call(
                "ListTasks",
                &ListTasksRequest {
                    cluster: &service.cluster,
                    service_name: &service.service,
                    desired_status: "RUNNING",
                },
            )
            .await?;
        Ok(response
            .task_arns
            .iter()
            .map(|arn| task_id_from_arn(arn).to_string())
            .collect())
    }

    #[instrument(skip(self), fields(service = %service))]
    async fn describe_instance(
        &self,
        service: &ServiceHandle,
        instance_id: &str,
    ) -> Result<Vec<Attachment>> {
        let response: DescribeTasksResponse = self
            .ecs_call(
                "DescribeTasks",
                &DescribeTasksRequest {
                    cluster: &service.cluster,
                    tasks: [instance_id],
                },
            )
            .await?;

        let Some(task) = response.tasks.into_iter().next() else {
            let reason = response
                .failures
                .into_iter()
                .next()
                .map(|f| {
                    format!(
                        "{} ({})",
                        f.arn.unwrap_or_else(|| instance_id.to_string()),
                        f.reason.unwrap_or_default()
                    )
                })
                .unwrap_or_else(|| instance_id.to_string());
            return Err(PlatformError::NotFound(format!("task {}", reason)));
        };

        Ok(task
            .attachments
            .into_iter()
            .map(|a| Attachment {
                kind: a.kind,
                status: a.status,
                details: a
                    .details
                    .into_iter()
                    .map(|d| AttachmentDetail {
                        name: d.name,
                        value: d.value,
                    })
                    .collect(),
            })
            .collect())
    }

    #[instrument(skip(self), fields(service = %service))]
    async fn set_desired_count(&self, service: &ServiceHandle, count: u32) -> Result<()> {
        let _: serde_json::Value = self
            .ecs_call(
                "UpdateService",
                &UpdateServiceRequest {
                    cluster: &service.cluster,
                    service: &service.service,
                    desired_count: count,
                },
            )
            .await?;
        info!(desired_count = count, "Updated service desired count");
        Ok(())
    }
}
