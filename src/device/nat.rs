//! Port forwarding rules (`/network/nat`)

use super::Device;
use crate::error::{logged, Result, ValidationError};
use crate::models::{FormSnapshot, HeaderedTable, NatRule, PortSpec};
use std::net::Ipv4Addr;

const NAT_PATH: &str = "/network/nat";
const NAT_FORM: &str = "form#form_nat";

/// Check a rule before anything is sent to the device
pub fn validate_nat_rule(rule: &NatRule) -> std::result::Result<Ipv4Addr, ValidationError> {
    let ip: Ipv4Addr = rule
        .target_ip
        .parse()
        .map_err(|_| ValidationError::InvalidIp(rule.target_ip.clone()))?;

    match (rule.external_ports, rule.target_ports) {
        (PortSpec::Range(..), PortSpec::Range(..)) => {
            if rule.external_ports.span() != rule.target_ports.span() {
                return Err(ValidationError::RangeMismatch(rule.to_string()));
            }
        }
        (PortSpec::Single(_), PortSpec::Single(_)) => {}
        _ => return Err(ValidationError::PortKindMismatch(rule.to_string())),
    }
    Ok(ip)
}

fn port_fields(prefix_single: &str, prefix_range: &str, ports: PortSpec) -> [(String, String); 3] {
    let (single, low, high) = match ports {
        PortSpec::Single(port) => (port.to_string(), String::new(), String::new()),
        PortSpec::Range(low, high) => (String::new(), low.to_string(), high.to_string()),
    };
    [
        (prefix_single.to_string(), single),
        (format!("{prefix_range}_p0"), low),
        (format!("{prefix_range}_p1"), high),
    ]
}

impl Device {
    /// Forwarding rules, without the GUI "add" row and action columns
    pub async fn nat_config(&mut self) -> Result<HeaderedTable> {
        tracing::info!("Retrieving NAT configuration...");
        let mut data = self.rows(NAT_PATH, "table#nat_config").await?;
        data.rows.pop();
        for row in &mut data.rows {
            row.pop();
            row.pop();
        }
        Ok(data)
    }

    /// Port lists the NAT form posts back with every action
    async fn nat_port_lists(&mut self) -> Result<(FormSnapshot, Vec<(String, String)>)> {
        let form = self.form(NAT_PATH, NAT_FORM).await?;
        let lists = ["port_list_tcp", "port_list_udp"]
            .into_iter()
            .map(|name| {
                let value = form.get(name).unwrap_or_default();
                (name.to_string(), urlencoding::encode(value).into_owned())
            })
            .collect();
        Ok((form, lists))
    }

    pub async fn add_nat_rule(&mut self, rule: &NatRule) -> Result<()> {
        let ip = validate_nat_rule(rule).map_err(logged)?;
        tracing::info!("Adding NAT rule: {}", rule);

        let mut fields = vec![
            (
                "nat_rulename".to_string(),
                urlencoding::encode(&rule.name).into_owned(),
            ),
            ("nat_proto".to_string(), rule.protocol.as_str().to_string()),
            (
                "nat_range".to_string(),
                rule.external_ports.is_range().to_string(),
            ),
        ];
        fields.extend(port_fields("nat_extport", "nat_extrange", rule.external_ports));
        fields.extend(
            ip.octets()
                .iter()
                .enumerate()
                .map(|(i, octet)| (format!("nat_dstip_p{i}"), octet.to_string())),
        );
        fields.extend(port_fields("nat_dstport", "nat_dstrange", rule.target_ports));
        fields.push((
            "nat_active".to_string(),
            if rule.active { "on" } else { "" }.to_string(),
        ));
        fields.push(("action_add.x".to_string(), "0".to_string()));
        fields.push(("action_add.y".to_string(), "0".to_string()));

        let (_, lists) = self.nat_port_lists().await?;
        fields.extend(lists);

        self.submit(NAT_PATH, fields, "NAT rule configuration").await?;
        tracing::info!("Rule added successfully");
        Ok(())
    }

    /// Remove the rule whose GUI delete button is `action_remove.<id>`
    pub async fn remove_nat_rule(&mut self, id: u32) -> Result<()> {
        if id == 0 {
            return Err(logged(ValidationError::InvalidRuleId(id)));
        }
        tracing::info!("Removing NAT rule with ID: {}", id);

        let (form, lists) = self.nat_port_lists().await?;
        if !form.contains(&format!("action_remove.{id}")) {
            return Err(logged(ValidationError::UnknownRuleId(id)));
        }

        let mut fields = vec![
            (format!("action_remove.{id}.x"), "0".to_string()),
            (format!("action_remove.{id}.y"), "0".to_string()),
        ];
        fields.extend(lists);

        self.submit(NAT_PATH, fields, "NAT rule configuration").await?;
        tracing::info!("Rule removed successfully");
        Ok(())
    }
}
