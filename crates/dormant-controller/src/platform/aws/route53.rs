// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Route 53 binding for [`DnsRecords`].

use async_trait::async_trait;
use reqwest::Method;
use tracing::{info, instrument};

use super::{AwsPlatform, AwsRequest, AwsService, xml_error, xml_text};
use crate::platform::traits::{DnsRecord, DnsRecords, PlatformError, Result};

const API_VERSION: &str = "2013-04-01";

pub(super) fn parse_error(body: &str) -> Option<(String, String)> {
    xml_error(body)
}

/// Zone ids are accepted with or without the `/hostedzone/` prefix.
fn bare_zone_id(zone_id: &str) -> &str {
    zone_id.trim_start_matches("/hostedzone/")
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn change_batch(record: &DnsRecord) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ChangeResourceRecordSetsRequest xmlns="https://route53.amazonaws.com/doc/{version}/">
  <ChangeBatch>
    <Comment>Published by dormant-controller</Comment>
    <Changes>
      <Change>
        <Action>UPSERT</Action>
        <ResourceRecordSet>
          <Name>{name}</Name>
          <Type>{record_type}</Type>
          <TTL>{ttl}</TTL>
          <ResourceRecords>
            <ResourceRecord>
              <Value>{value}</Value>
            </ResourceRecord>
          </ResourceRecords>
        </ResourceRecordSet>
      </Change>
    </Changes>
  </ChangeBatch>
</ChangeResourceRecordSetsRequest>"#,
        version = API_VERSION,
        name = escape_xml(&record.name),
        record_type = record.record_type,
        ttl = record.ttl_secs,
        value = record.value,
    )
}

#[async_trait]
impl DnsRecords for AwsPlatform {
    #[instrument(skip(self, record), fields(name = %record.name, value = %record.value))]
    async fn upsert_record(&self, record: &DnsRecord) -> Result<()> {
        let path = format!(
            "/{}/hostedzone/{}/rrset/",
            API_VERSION,
            urlencoding::encode(bare_zone_id(&record.zone_id))
        );
        let body = self
            .send(AwsRequest {
                service: AwsService::Route53,
                method: Method::POST,
                path: &path,
                headers: vec![("content-type".to_string(), "text/xml".to_string())],
                body: change_batch(record).into_bytes(),
            })
            .await?;

        let doc = roxmltree::Document::parse(&body)
            .map_err(|e| PlatformError::Decode(format!("ChangeResourceRecordSets: {}", e)))?;
        let root = doc.root_element();
        info!(
            change_id = xml_text(root, "Id").unwrap_or_default(),
            status = xml_text(root, "Status").unwrap_or_default(),
            "Upserted DNS record"
        );
        Ok(())
    }
}
