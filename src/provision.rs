//! Creation of fresh testers, one per region, from a cloud-init template.
//!
//! Each region is attempted once, in order. A rejected creation is recorded
//! and the next region is still attempted.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::backend::{CloudControl, CloudError, CreateRequest, CreatedServer};
use crate::cloud_init::{Placeholders, Template};
use crate::config::ProvisionSettings;

/// Regions testers are created in when none are given.
pub const DEFAULT_REGIONS: [&str; 4] = ["fsn1", "nbg1", "hel1", "ash"];

/// Returns [`DEFAULT_REGIONS`] as owned strings.
#[must_use]
pub fn default_regions() -> Vec<String> {
    DEFAULT_REGIONS.iter().map(|region| (*region).to_owned()).collect()
}

/// Result of creating the tester for one region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionOutcome {
    /// Location the tester was requested in.
    pub region: String,
    /// Name sent to the provider.
    pub name: String,
    /// Accepted server, or why the provider refused it.
    pub result: Result<CreatedServer, CloudError>,
}

/// Outcomes of a `create` run, in region order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisionSummary {
    /// One outcome per region.
    pub outcomes: Vec<ProvisionOutcome>,
}

impl ProvisionSummary {
    /// Number of regions whose tester was accepted.
    #[must_use]
    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_ok())
            .count()
    }

    /// Number of regions whose creation failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.created()
    }
}

/// Name given to the tester created in `region` at `stamp` (unix seconds).
#[must_use]
pub fn tester_name(prefix: &str, region: &str, stamp: i64) -> String {
    format!("{prefix}-{region}-{stamp}")
}

/// Builds the creation request for `region`, rendering the template with the
/// region's values and labelling the server with `project` and `region`.
#[must_use]
pub fn create_request(
    settings: &ProvisionSettings,
    template: &Template,
    region: &str,
    stamp: i64,
) -> CreateRequest {
    let user_data = template.render(&Placeholders {
        api_token: &settings.api_token,
        git_repo_url: &settings.git_repo_url,
        backend_url: &settings.backend_url,
        backend_key: &settings.backend_key,
        region,
    });
    let labels = BTreeMap::from([
        (String::from("project"), settings.project_label.clone()),
        (String::from("region"), region.to_owned()),
    ]);
    CreateRequest {
        name: tester_name(&settings.name_prefix, region, stamp),
        server_type: settings.server_type.clone(),
        image: settings.image.clone(),
        location: region.to_owned(),
        user_data,
        ssh_keys: settings.ssh_keys.clone(),
        labels,
    }
}

/// Requests one tester per region and tallies the outcomes.
pub async fn create_testers<C: CloudControl>(
    cloud: &C,
    settings: &ProvisionSettings,
    template: &Template,
    regions: &[String],
    stamp: i64,
) -> ProvisionSummary {
    let mut summary = ProvisionSummary::default();
    for region in regions {
        let request = create_request(settings, template, region, stamp);
        info!(%region, name = %request.name, "creating tester");
        let result = cloud.create_server(&request).await;
        match &result {
            Ok(server) => info!(%region, id = %server.id, "tester creation accepted"),
            Err(err) => warn!(%region, error = %err, "tester creation failed"),
        }
        summary.outcomes.push(ProvisionOutcome {
            region: region.clone(),
            name: request.name,
            result,
        });
    }
    summary
}
