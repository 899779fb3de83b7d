// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! EC2 binding for [`NetworkInterfaces`].

use std::net::Ipv4Addr;

use async_trait::async_trait;
use reqwest::Method;
use tracing::instrument;

use super::{AwsPlatform, AwsRequest, AwsService, xml_error, xml_text};
use crate::platform::traits::{InterfaceAddresses, NetworkInterfaces, PlatformError, Result};

const API_VERSION: &str = "2016-11-15";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

pub(super) fn parse_error(body: &str) -> Option<(String, String)> {
    xml_error(body)
}

fn describe_body(interface_id: &str) -> String {
    format!(
        "Action=DescribeNetworkInterfaces&Version={}&NetworkInterfaceId.1={}",
        API_VERSION,
        urlencoding::encode(interface_id)
    )
}

/// Addresses of the first interface in a `DescribeNetworkInterfaces` response.
fn parse_addresses(body: &str, interface_id: &str) -> Result<InterfaceAddresses> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| PlatformError::Decode(format!("DescribeNetworkInterfaces: {}", e)))?;

    let item = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "networkInterfaceSet")
        .and_then(|set| {
            set.children()
                .find(|n| n.is_element() && n.tag_name().name() == "item")
        })
        .ok_or_else(|| PlatformError::NotFound(format!("network interface {}", interface_id)))?;

    let private = item
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "privateIpAddress")
        .and_then(|n| n.text())
        .map(str::trim);

    let public = item
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "association")
        .and_then(|association| xml_text(association, "publicIp"));

    Ok(InterfaceAddresses {
        public: parse_ip(public)?,
        private: parse_ip(private)?,
    })
}

fn parse_ip(text: Option<&str>) -> Result<Option<Ipv4Addr>> {
    match text {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|e| PlatformError::Decode(format!("invalid address '{}': {}", text, e))),
    }
}

#[async_trait]
impl NetworkInterfaces for AwsPlatform {
    #[instrument(skip(self))]
    async fn describe_interface(&self, interface_id: &str) -> Result<InterfaceAddresses> {
        let body = self
            .send(AwsRequest {
                service: AwsService::Ec2,
                method: Method::POST,
                path: "/",
                headers: vec![("content-type".to_string(), CONTENT_TYPE.to_string())],
                body: describe_body(interface_id).into_bytes(),
            })
            .await?;
        parse_addresses(&body, interface_id)
    }
}
