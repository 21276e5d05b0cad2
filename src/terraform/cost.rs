//! Rough monthly cost estimate for a deployed Terraform state.
//!
//! Prices are us-east-1 on-demand list prices. The estimate is informational
//! and never affects a run's outcome.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

const MONTHLY_HOURS: f64 = 730.0;
const MAX_SUGGESTIONS: usize = 8;
const HIGH_COST_THRESHOLD: f64 = 100.0;

const EBS_GP2_PER_GB: f64 = 0.10;
const S3_STANDARD_PER_GB: f64 = 0.023;
const RDS_STORAGE_PER_GB: f64 = 0.115;

const EC2_HOURLY: &[(&str, f64)] = &[
    ("t2.micro", 0.0116),
    ("t2.small", 0.023),
    ("t2.medium", 0.0464),
    ("t3.micro", 0.0104),
    ("t3.small", 0.0208),
    ("t3.medium", 0.0416),
    ("t3.large", 0.0832),
    ("t3.xlarge", 0.1664),
    ("m5.large", 0.096),
    ("m5.xlarge", 0.192),
    ("m5.2xlarge", 0.384),
];

const RDS_HOURLY: &[(&str, f64)] = &[
    ("db.t3.micro", 0.017),
    ("db.t3.small", 0.034),
    ("db.t3.medium", 0.068),
    ("db.t3.large", 0.136),
    ("db.m5.large", 0.192),
    ("db.m5.xlarge", 0.384),
];

const ELASTICACHE_HOURLY: &[(&str, f64)] = &[
    ("cache.t3.micro", 0.017),
    ("cache.t3.small", 0.034),
    ("cache.m5.large", 0.161),
    ("cache.r5.large", 0.201),
];

pub const GENERAL_RECOMMENDATIONS: &[&str] = &[
    "Set up AWS Budgets to track spending",
    "Enable AWS Cost Anomaly Detection",
    "Use Cost Explorer for detailed analysis",
    "Tag all resources for cost allocation",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostItem {
    pub service: String,
    pub resource: String,
    pub monthly_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    pub items: Vec<CostItem>,
    pub total: f64,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StateFile {
    #[serde(default)]
    resources: Vec<StateResource>,
}

#[derive(Debug, Deserialize)]
struct StateResource {
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    instances: Vec<StateInstance>,
}

#[derive(Debug, Deserialize)]
struct StateInstance {
    #[serde(default)]
    attributes: Map<String, Value>,
}

/// Estimate from a `terraform.tfstate` file.
///
/// Returns `Ok(None)` when nothing has been deployed yet.
pub async fn estimate_from_state(state_file: &Path) -> Result<Option<CostEstimate>> {
    let raw = match tokio::fs::read_to_string(state_file).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    estimate(&raw)
}

/// Estimate from the JSON text of a Terraform state.
pub fn estimate(state_json: &str) -> Result<Option<CostEstimate>> {
    let state: StateFile = serde_json::from_str(state_json)
        .map_err(|e| AppError::Tool(format!("Could not parse terraform state file: {e}")))?;

    if state.resources.is_empty() {
        return Ok(None);
    }

    let mut items = Vec::new();
    let mut suggestions = Vec::new();

    for resource in &state.resources {
        for instance in &resource.instances {
            let Some(item) =
                price_resource(&resource.resource_type, &resource.name, &instance.attributes)
            else {
                continue;
            };
            suggestions.extend(suggest(
                &resource.resource_type,
                &resource.name,
                &instance.attributes,
                item.monthly_cost,
            ));
            items.push(item);
        }
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    let total = items.iter().map(|i| i.monthly_cost).sum();

    Ok(Some(CostEstimate {
        items,
        total,
        suggestions,
    }))
}

impl CostEstimate {
    pub fn exceeds_threshold(&self) -> bool {
        self.total > HIGH_COST_THRESHOLD
    }
}

impl fmt::Display for CostEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);

        writeln!(f, "ESTIMATED MONTHLY COST: ${:.2}", self.total)?;
        writeln!(f, "{rule}\n")?;
        writeln!(f, "COST BREAKDOWN:")?;
        writeln!(f, "{thin}")?;
        for item in &self.items {
            writeln!(
                f,
                "{:15} | {:30} | ${:>8.2}",
                item.service, item.resource, item.monthly_cost
            )?;
        }
        writeln!(f, "{thin}")?;
        writeln!(f, "{:15} | {:30} | ${:>8.2}", "TOTAL", "", self.total)?;

        if !self.suggestions.is_empty() {
            writeln!(f, "\n{rule}\nCOST OPTIMIZATION SUGGESTIONS:\n{rule}")?;
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                writeln!(f, "{}. {suggestion}", i + 1)?;
            }
        }

        writeln!(f, "\n{rule}\nGENERAL RECOMMENDATIONS:\n{rule}")?;
        for rec in GENERAL_RECOMMENDATIONS {
            writeln!(f, "- {rec}")?;
        }

        if self.exceeds_threshold() {
            write!(
                f,
                "\nWARNING: Monthly cost exceeds ${HIGH_COST_THRESHOLD:.0}. \
                 Review your architecture for optimization opportunities."
            )?;
        }
        Ok(())
    }
}

fn lookup(table: &[(&str, f64)], key: &str, fallback: &str) -> f64 {
    let find = |k: &str| table.iter().find(|(name, _)| *name == k).map(|(_, p)| *p);
    find(key).or_else(|| find(fallback)).unwrap_or_default()
}

fn str_attr<'a>(attrs: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    attrs.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn num_attr(attrs: &Map<String, Value>, key: &str, default: f64) -> f64 {
    attrs.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn item(service: &str, resource: String, monthly_cost: f64) -> Option<CostItem> {
    Some(CostItem {
        service: service.to_string(),
        resource,
        monthly_cost,
    })
}

fn price_resource(kind: &str, name: &str, attrs: &Map<String, Value>) -> Option<CostItem> {
    match kind {
        "aws_instance" => {
            let instance_type = str_attr(attrs, "instance_type", "t3.micro");
            let mut cost = lookup(EC2_HOURLY, instance_type, "t3.micro") * MONTHLY_HOURS;
            let root_volume = attrs
                .get("root_block_device")
                .and_then(Value::as_array)
                .and_then(|vols| vols.first())
                .and_then(Value::as_object);
            if let Some(volume) = root_volume {
                cost += num_attr(volume, "volume_size", 20.0) * EBS_GP2_PER_GB;
            }
            item("EC2", format!("{instance_type} ({name})"), cost)
        }
        // 10 GB of standard storage
        "aws_s3_bucket" => item("S3", format!("Bucket ({name})"), 10.0 * S3_STANDARD_PER_GB),
        "aws_dynamodb_table" => {
            let cost = if str_attr(attrs, "billing_mode", "PAY_PER_REQUEST") == "PAY_PER_REQUEST" {
                // 1M writes at $1.25/M, 5M reads at $0.25/M
                1.0 * 1.25 + 5.0 * 0.25
            } else {
                let read = num_attr(attrs, "read_capacity", 5.0);
                let write = num_attr(attrs, "write_capacity", 5.0);
                (read * 0.00013 + write * 0.00065) * MONTHLY_HOURS
            };
            item("DynamoDB", format!("Table ({name})"), cost)
        }
        "aws_db_instance" => {
            let class = str_attr(attrs, "instance_class", "db.t3.micro");
            let storage = num_attr(attrs, "allocated_storage", 20.0);
            let cost = lookup(RDS_HOURLY, class, "db.t3.micro") * MONTHLY_HOURS
                + storage * RDS_STORAGE_PER_GB;
            item("RDS", format!("{class} ({name})"), cost)
        }
        "aws_lambda_function" => item("Lambda", format!("Function ({name})"), 0.20),
        // Hourly charge plus 100 GB processed
        "aws_nat_gateway" => item(
            "NAT Gateway",
            name.to_string(),
            0.045 * MONTHLY_HOURS + 100.0 * 0.045,
        ),
        "aws_lb" | "aws_alb" => item(
            "Load Balancer",
            name.to_string(),
            (0.0225 + 0.008) * MONTHLY_HOURS,
        ),
        "aws_elasticache_cluster" => {
            let node_type = str_attr(attrs, "node_type", "cache.t3.micro");
            let nodes = num_attr(attrs, "num_cache_nodes", 1.0);
            let cost =
                lookup(ELASTICACHE_HOURLY, node_type, "cache.t3.micro") * MONTHLY_HOURS * nodes;
            item("ElastiCache", format!("{node_type} x{nodes}"), cost)
        }
        _ => None,
    }
}

fn suggest(kind: &str, name: &str, attrs: &Map<String, Value>, monthly_cost: f64) -> Vec<String> {
    let mut out = Vec::new();
    match kind {
        "aws_instance" => {
            if str_attr(attrs, "instance_type", "").starts_with("t2.") {
                out.push(format!(
                    "Consider moving '{name}' from T2 to T3 instances for ~10% cost savings and better performance"
                ));
            }
            if monthly_cost > 50.0 {
                out.push(format!(
                    "'{name}' costs ${monthly_cost:.2}/month. Use Reserved Instances for 40-60% savings on long-term workloads"
                ));
            }
        }
        "aws_dynamodb_table" => {
            if str_attr(attrs, "billing_mode", "") == "PAY_PER_REQUEST" && monthly_cost > 10.0 {
                out.push(format!(
                    "Table '{name}' uses on-demand pricing. Switch to provisioned capacity if traffic is predictable (50%+ savings)"
                ));
            }
        }
        "aws_db_instance" if monthly_cost > 30.0 => out.push(format!(
            "RDS '{name}' costs ${monthly_cost:.2}/month. Consider Aurora Serverless v2 for variable workloads"
        )),
        "aws_s3_bucket" => out.push(format!(
            "Enable S3 Intelligent-Tiering on '{name}' to automatically optimize storage costs"
        )),
        "aws_nat_gateway" => out.push(format!(
            "NAT Gateway costs ${monthly_cost:.2}/month. Consider VPC endpoints for AWS services to reduce data transfer costs"
        )),
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_prices_known_resources() {
        let state = r#"{
            "resources": [
                {"type": "aws_instance", "name": "web", "instances": [
                    {"attributes": {"instance_type": "t2.micro",
                                    "root_block_device": [{"volume_size": 30}]}}
                ]},
                {"type": "aws_s3_bucket", "name": "logs", "instances": [{"attributes": {}}]},
                {"type": "aws_iam_role", "name": "ignored", "instances": [{"attributes": {}}]}
            ]
        }"#;

        let estimate = estimate(state).unwrap().unwrap();

        assert_eq!(estimate.items.len(), 2);
        assert_eq!(estimate.items[0].resource, "t2.micro (web)");
        assert!(close(estimate.items[0].monthly_cost, 0.0116 * 730.0 + 3.0));
        assert!(close(estimate.items[1].monthly_cost, 0.23));
        assert!(close(estimate.total, 0.0116 * 730.0 + 3.0 + 0.23));
        // T2 upgrade + S3 tiering
        assert_eq!(estimate.suggestions.len(), 2);
        assert!(!estimate.exceeds_threshold());
    }

    #[test]
    fn test_unknown_instance_type_falls_back() {
        let state = r#"{"resources": [{"type": "aws_db_instance", "name": "db",
            "instances": [{"attributes": {"instance_class": "db.x9.huge", "allocated_storage": 100}}]}]}"#;
        let estimate = estimate(state).unwrap().unwrap();
        assert!(close(estimate.total, 0.017 * 730.0 + 100.0 * 0.115));
    }

    #[test]
    fn test_high_cost_warning_and_suggestion_cap() {
        let nat = r#"{"type": "aws_nat_gateway", "name": "nat", "instances": [{"attributes": {}}]}"#;
        let resources = vec![nat; 10].join(",");
        let state = format!(r#"{{"resources": [{resources}]}}"#);

        let estimate = estimate(&state).unwrap().unwrap();

        assert_eq!(estimate.items.len(), 10);
        assert_eq!(estimate.suggestions.len(), MAX_SUGGESTIONS);
        assert!(estimate.exceeds_threshold());
        let report = estimate.to_string();
        assert!(report.contains("WARNING: Monthly cost exceeds $100"));
        assert!(report.contains("8. NAT Gateway costs"));
        assert!(!report.contains("\n9. "));
    }

    #[test]
    fn test_empty_state_has_no_estimate() {
        assert!(estimate(r#"{"version": 4, "resources": []}"#).unwrap().is_none());
        assert!(estimate("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_state_file_has_no_estimate() {
        let tmp = tempfile::tempdir().unwrap();
        let result = estimate_from_state(&tmp.path().join("terraform.tfstate"))
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
